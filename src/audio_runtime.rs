//! Local playback device: a dedicated audio thread with channel-based commands.
//!
//! The thread owns the rodio `Player` (not `Send`). [`LocalDevice`] is the
//! `Send + Sync` face of it: setters push an [`AudioCmd`] and return, while
//! reads come from a shared status block the thread keeps current. Clip end
//! is detected inside the loop via `recv_timeout` + `Sink::empty()`.
//!
//! Besides the clip output there can be any number of named *beds*: looping
//! background files whose only control is volume. They are what the ducker
//! turns down while a clip plays.

use crate::device::{LoadOptions, MediaDevice, MediaState};
use crate::error::DeviceError;
use crate::player::Player;
use rodio::Sink;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

// ── Commands ─────────────────────────────────────────────────────────────────

/// Commands sent to the audio thread.
#[derive(Debug)]
pub enum AudioCmd {
    /// Stop whatever the clip output is doing; the new file is in the status block.
    Load,
    Enable(bool),
    /// Re-apply the clip volume (after a mute or volume change).
    RefreshClipVolume,
    SetBedVolume { name: String, volume: f32 },
    Shutdown,
}

// ── Shared status ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct ClipStatus {
    file: Option<PathBuf>,
    options: LoadOptions,
    muted: bool,
    volume: f32,
    state: MediaState,
    /// Bumped on every load and enable; audio-thread reports for an older
    /// generation are discarded.
    generation: u64,
}

impl ClipStatus {
    fn effective_volume(&self) -> f32 {
        if self.muted { 0.0 } else { self.volume }
    }
}

#[derive(Debug)]
struct Status {
    clip: ClipStatus,
    beds: BTreeMap<String, f32>,
}

fn lock(status: &Mutex<Status>) -> MutexGuard<'_, Status> {
    status.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Device ───────────────────────────────────────────────────────────────────

/// A named looping background file.
#[derive(Debug, Clone, PartialEq)]
pub struct Bed {
    pub name: String,
    pub path: PathBuf,
}

impl Bed {
    /// Parse the `name=path` form used on the command line.
    pub fn parse(arg: &str) -> Result<Bed, String> {
        match arg.split_once('=') {
            Some((name, path)) if !name.trim().is_empty() && !path.trim().is_empty() => Ok(Bed {
                name: name.trim().to_string(),
                path: PathBuf::from(path.trim()),
            }),
            _ => Err(format!("expected NAME=PATH, got '{}'", arg)),
        }
    }
}

/// Renders clips on a local sound card.
pub struct LocalDevice {
    output: String,
    tx: mpsc::Sender<AudioCmd>,
    status: Arc<Mutex<Status>>,
}

impl LocalDevice {
    /// Spawn the audio thread.
    ///
    /// `output` is the source name the clip output answers to. `device_name`
    /// selects the sound card (None = system default). Beds start looping
    /// at full volume; a bed whose file cannot be decoded is dropped with a
    /// warning and then reads as not found.
    pub fn spawn(output: &str, device_name: Option<String>, beds: Vec<Bed>) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<AudioCmd>();
        let status = Arc::new(Mutex::new(Status {
            clip: ClipStatus {
                file: None,
                options: LoadOptions::ONE_SHOT,
                muted: false,
                volume: 1.0,
                state: MediaState::Idle,
                generation: 0,
            },
            beds: beds.iter().map(|b| (b.name.clone(), 1.0)).collect(),
        }));

        let thread_status = Arc::clone(&status);
        std::thread::Builder::new()
            .name("audio-runtime".into())
            .spawn(move || audio_thread_loop(rx, device_name, beds, thread_status))?;

        Ok(LocalDevice {
            output: output.to_string(),
            tx,
            status,
        })
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(AudioCmd::Shutdown);
    }

    fn send(&self, cmd: AudioCmd) -> Result<(), DeviceError> {
        self.tx
            .send(cmd)
            .map_err(|_| DeviceError::Backend("audio thread has stopped".into()))
    }

    fn check_clip(&self, name: &str) -> Result<(), DeviceError> {
        if name == self.output {
            Ok(())
        } else if lock(&self.status).beds.contains_key(name) {
            Err(DeviceError::Backend(format!("'{}' is a bed and only supports volume", name)))
        } else {
            Err(DeviceError::NotFound(name.to_string()))
        }
    }
}

impl Drop for LocalDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl MediaDevice for LocalDevice {
    fn set_file(&self, name: &str, file: Option<&Path>, options: LoadOptions) -> Result<(), DeviceError> {
        self.check_clip(name)?;
        {
            let mut status = lock(&self.status);
            status.clip.file = file.map(Path::to_path_buf);
            status.clip.options = options;
            status.clip.state = MediaState::Idle;
            status.clip.generation += 1;
        }
        self.send(AudioCmd::Load)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), DeviceError> {
        self.check_clip(name)?;
        {
            let mut status = lock(&self.status);
            status.clip.state = if enabled && status.clip.file.is_some() {
                MediaState::Opening
            } else {
                MediaState::Idle
            };
            status.clip.generation += 1;
        }
        self.send(AudioCmd::Enable(enabled))
    }

    fn set_muted(&self, name: &str, muted: bool) -> Result<(), DeviceError> {
        self.check_clip(name)?;
        lock(&self.status).clip.muted = muted;
        self.send(AudioCmd::RefreshClipVolume)
    }

    fn state(&self, name: &str) -> Result<MediaState, DeviceError> {
        self.check_clip(name)?;
        Ok(lock(&self.status).clip.state)
    }

    fn volume(&self, name: &str) -> Result<f32, DeviceError> {
        let status = lock(&self.status);
        if name == self.output {
            return Ok(status.clip.volume);
        }
        status
            .beds
            .get(name)
            .copied()
            .ok_or_else(|| DeviceError::NotFound(name.to_string()))
    }

    fn set_volume(&self, name: &str, volume: f32) -> Result<(), DeviceError> {
        let volume = volume.max(0.0);
        let cmd = {
            let mut status = lock(&self.status);
            if name == self.output {
                status.clip.volume = volume;
                AudioCmd::RefreshClipVolume
            } else if let Some(level) = status.beds.get_mut(name) {
                *level = volume;
                AudioCmd::SetBedVolume {
                    name: name.to_string(),
                    volume,
                }
            } else {
                return Err(DeviceError::NotFound(name.to_string()));
            }
        };
        self.send(cmd)
    }
}

// ── Runtime ──────────────────────────────────────────────────────────────────

/// Report `state` for the clip started at `generation`, unless a newer
/// load or enable has happened since.
fn set_clip_state(status: &Mutex<Status>, generation: u64, state: MediaState) {
    let mut s = lock(status);
    if s.clip.generation == generation {
        s.clip.state = state;
    }
}

/// The sink for `generation` ran dry.
fn finish_clip(status: &Mutex<Status>, generation: u64) {
    let mut s = lock(status);
    if s.clip.generation != generation {
        return;
    }
    s.clip.state = if s.clip.options.close_when_inactive {
        MediaState::Ended
    } else {
        MediaState::Idle
    };
}

/// Main loop for the audio thread. Owns the Player and every sink.
fn audio_thread_loop(
    rx: mpsc::Receiver<AudioCmd>,
    device_name: Option<String>,
    beds: Vec<Bed>,
    status: Arc<Mutex<Status>>,
) {
    let player = match Player::open(device_name.as_deref()) {
        Ok(p) => Some(p),
        Err(e) => {
            error!(error = %e, "audio output unavailable; clips will report errors");
            None
        }
    };

    let mut bed_sinks: HashMap<String, Sink> = HashMap::new();
    for bed in beds {
        let started = player
            .as_ref()
            .ok_or_else(|| "no audio output".to_string())
            .and_then(|p| p.play_looped(&bed.path, 1.0));
        match started {
            Ok(sink) => {
                info!(bed = %bed.name, path = %bed.path.display(), "bed looping");
                bed_sinks.insert(bed.name, sink);
            }
            Err(e) => {
                warn!(bed = %bed.name, error = %e, "bed could not start");
                lock(&status).beds.remove(&bed.name);
            }
        }
    }

    let mut clip: Option<(Sink, u64)> = None;

    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(AudioCmd::Load) => {
                if let Some((sink, _)) = clip.take() {
                    sink.stop();
                }
            }

            Ok(AudioCmd::Enable(enabled)) => {
                if let Some((sink, _)) = clip.take() {
                    sink.stop();
                }
                // The caller already reported Idle (or Opening for a
                // following enable), so disabling only stops the sink.
                if !enabled {
                    continue;
                }
                let current = lock(&status).clip.clone();
                let generation = current.generation;
                // A later disable or reload already took over.
                if current.state != MediaState::Opening && current.file.is_some() {
                    continue;
                }
                let Some(ref file) = current.file else {
                    set_clip_state(&status, generation, MediaState::Idle);
                    continue;
                };
                let Some(p) = player.as_ref() else {
                    set_clip_state(&status, generation, MediaState::Error);
                    continue;
                };
                let volume = current.effective_volume();
                let started = if current.options.looping {
                    p.play_looped(&file, volume)
                } else {
                    p.play_once(&file, volume)
                };
                match started {
                    Ok(sink) => {
                        debug!(file = %file.display(), "clip started");
                        clip = Some((sink, generation));
                        set_clip_state(&status, generation, MediaState::Playing);
                    }
                    Err(e) => {
                        warn!(error = %e, "clip failed to start");
                        set_clip_state(&status, generation, MediaState::Error);
                    }
                }
            }

            Ok(AudioCmd::RefreshClipVolume) => {
                if let Some((sink, _)) = &clip {
                    sink.set_volume(lock(&status).clip.effective_volume());
                }
            }

            Ok(AudioCmd::SetBedVolume { name, volume }) => {
                if let Some(sink) = bed_sinks.get(&name) {
                    sink.set_volume(volume);
                }
            }

            Ok(AudioCmd::Shutdown) => {
                if let Some((sink, _)) = clip.take() {
                    sink.stop();
                }
                for sink in bed_sinks.values() {
                    sink.stop();
                }
                break;
            }

            Err(mpsc::RecvTimeoutError::Timeout) => {
                if clip.as_ref().is_some_and(|(sink, _)| sink.empty()) {
                    if let Some((_, generation)) = clip.take() {
                        finish_clip(&status, generation);
                    }
                }
            }

            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("audio thread exiting");
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn wait_for(device: &LocalDevice, name: &str, pred: impl Fn(MediaState) -> bool) -> MediaState {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let state = device.state(name).unwrap();
            if pred(state) || Instant::now() > deadline {
                return state;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LocalDevice>();
    }

    #[test]
    fn bed_spec_parses() {
        assert_eq!(
            Bed::parse("Music=/srv/bed.mp3").unwrap(),
            Bed {
                name: "Music".into(),
                path: PathBuf::from("/srv/bed.mp3")
            }
        );
        assert!(Bed::parse("Music").is_err());
        assert!(Bed::parse("=x.wav").is_err());
    }

    #[test]
    fn unknown_names_are_not_found() {
        let device = LocalDevice::spawn("Clips", None, Vec::new()).unwrap();
        assert_eq!(device.state("Other"), Err(DeviceError::NotFound("Other".into())));
        assert!(matches!(device.set_volume("Other", 0.5), Err(DeviceError::NotFound(_))));
        device.shutdown();
    }

    #[test]
    fn clip_volume_round_trips() {
        let device = LocalDevice::spawn("Clips", None, Vec::new()).unwrap();
        device.set_volume("Clips", 0.4).unwrap();
        assert_eq!(device.volume("Clips").unwrap(), 0.4);
        device.set_muted("Clips", true).unwrap();
        assert_eq!(device.volume("Clips").unwrap(), 0.4);
    }

    #[test]
    fn undecodable_clip_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("broken.wav");
        std::fs::write(&file, b"not audio").unwrap();

        let device = LocalDevice::spawn("Clips", None, Vec::new()).unwrap();
        device.set_file("Clips", Some(&file), LoadOptions::ONE_SHOT).unwrap();
        device.set_enabled("Clips", true).unwrap();
        // Either decoding fails or there is no sound card at all.
        let state = wait_for(&device, "Clips", |s| s == MediaState::Error);
        assert_eq!(state, MediaState::Error);
    }

    #[test]
    fn enable_without_file_stays_idle() {
        let device = LocalDevice::spawn("Clips", None, Vec::new()).unwrap();
        device.set_enabled("Clips", true).unwrap();
        assert_eq!(device.state("Clips").unwrap(), MediaState::Idle);
    }

    fn clip_status(generation: u64) -> Mutex<Status> {
        Mutex::new(Status {
            clip: ClipStatus {
                file: Some(PathBuf::from("next.wav")),
                options: LoadOptions::ONE_SHOT,
                muted: false,
                volume: 1.0,
                state: MediaState::Opening,
                generation,
            },
            beds: BTreeMap::new(),
        })
    }

    #[test]
    fn drained_sink_from_older_load_keeps_new_clip_opening() {
        let status = clip_status(4);
        finish_clip(&status, 3);
        assert_eq!(lock(&status).clip.state, MediaState::Opening);
        set_clip_state(&status, 3, MediaState::Error);
        assert_eq!(lock(&status).clip.state, MediaState::Opening);

        finish_clip(&status, 4);
        assert_eq!(lock(&status).clip.state, MediaState::Ended);
    }

    #[test]
    fn reload_and_enable_advance_generation() {
        let device = LocalDevice::spawn("Clips", None, Vec::new()).unwrap();
        let before = lock(&device.status).clip.generation;
        device
            .set_file("Clips", Some(Path::new("a.wav")), LoadOptions::ONE_SHOT)
            .unwrap();
        device.set_enabled("Clips", false).unwrap();
        device.set_enabled("Clips", true).unwrap();
        assert_eq!(lock(&device.status).clip.generation, before + 3);
    }

    #[test]
    fn broken_bed_is_dropped() {
        let bed = Bed {
            name: "Music".into(),
            path: PathBuf::from("__missing_bed__.mp3"),
        };
        let device = LocalDevice::spawn("Clips", None, vec![bed]).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while device.volume("Music").is_ok() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(matches!(device.volume("Music"), Err(DeviceError::NotFound(_))));
        assert!(matches!(device.state("Music"), Err(DeviceError::NotFound(_))));
    }
}
