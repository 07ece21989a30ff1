//! The clip queue and the playback state machine.
//!
//! One [`Engine`] owns the playback session, the ducking snapshot, the
//! trigger countdowns and the device. It is driven from a single loop
//! ([`Engine::run`]) fed by a 1 Hz master tick, a 5 Hz monitor tick and a
//! command channel. Producers (HTTP, triggers, operator) only ever touch the
//! shared queue through a cloneable [`EngineHandle`].
//!
//! The shared lock covers the queue, config and pick history only. Device
//! calls are always made after it is released, so a slow device never
//! stalls a producer.

use crate::config::Config;
use crate::device::{LoadOptions, MediaDevice, MediaState};
use crate::ducking::Ducker;
use crate::error::{Error, Result};
use crate::picker::{self, FilePicker};
use crate::scheduler::{self, Trigger, TriggerState};
use crate::status::{self, EngineState, Heartbeat, StatusSnapshot};
use crate::task::{Task, TaskKind, TaskQueue};
use crate::wav;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub const MASTER_TICK: Duration = Duration::from_millis(1000);
pub const MONITOR_TICK: Duration = Duration::from_millis(200);
/// Hard ceiling on a single clip.
pub const PLAYBACK_TIMEOUT_MS: i64 = 60_000;
/// Non-playing states are tolerated this long after dispatch.
pub const STARTUP_GRACE_MS: i64 = 2_000;
/// Self-heal only second-guesses sessions older than this.
pub const SELF_HEAL_AFTER_MS: i64 = 5_000;

/// Messages processed by the engine loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCmd {
    /// Start working through the queue (sent when leaving Idle).
    Dispatch,
    /// Fire the time announcement now.
    TriggerTime,
    /// Fire a noise clip now.
    TriggerNoise,
    Shutdown,
}

/// State shared between producers and the engine loop.
struct Shared {
    config: Arc<Config>,
    queue: TaskQueue,
    picker: FilePicker,
    /// False only while the engine is Idle.
    busy: bool,
    heartbeat: Heartbeat,
}

/// Cloneable producer-side access to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Mutex<Shared>>,
    tx: mpsc::UnboundedSender<EngineCmd>,
}

impl EngineHandle {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send(&self, cmd: EngineCmd) {
        if self.tx.send(cmd).is_err() {
            debug!(?cmd, "engine loop gone, command dropped");
        }
    }

    /// Queue a clip. `input` may be a file or a directory to pick from.
    /// Returns the file that was queued.
    pub fn enqueue(&self, input: &Path, kind: TaskKind) -> Result<PathBuf> {
        self.enqueue_at(input, kind, Local::now())
    }

    pub fn enqueue_at(&self, input: &Path, kind: TaskKind, now: DateTime<Local>) -> Result<PathBuf> {
        let file = if input.is_file() {
            input.to_path_buf()
        } else if input.is_dir() {
            self.pick(input, kind == TaskKind::Noise).ok_or_else(|| {
                Error::Empty(format!("no audio files in '{}'", input.display()))
            })?
        } else {
            return Err(Error::Empty(format!("'{}' does not exist", input.display())));
        };

        let kick = {
            let mut shared = self.lock();
            shared.queue.push(Task::new(file.clone(), kind, now));
            let was_idle = !shared.busy;
            shared.busy = true;
            was_idle
        };
        info!(%kind, file = %file.display(), "enqueued");

        // Never dispatch in-line: the loop picks it up on its next turn.
        if kick {
            self.send(EngineCmd::Dispatch);
        }
        Ok(file)
    }

    /// Pick a file from `dir`, consulting the pick history when asked.
    pub fn pick(&self, dir: &Path, use_history: bool) -> Option<PathBuf> {
        let files = picker::list_audio_files(dir);
        let mut shared = self.lock();
        let history_size = shared.config.history_size;
        shared.picker.pick_from(dir, &files, use_history, history_size)
    }

    pub fn record_heartbeat(&self) {
        self.record_heartbeat_at(Local::now());
    }

    pub fn record_heartbeat_at(&self, now: DateTime<Local>) {
        self.lock().heartbeat.record(now);
    }

    pub fn is_connected_at(&self, now: DateTime<Local>) -> bool {
        self.lock().heartbeat.is_connected(now)
    }

    pub fn config(&self) -> Arc<Config> {
        self.lock().config.clone()
    }

    /// Swap in a new config; readers see either the old or the new one.
    pub fn set_config(&self, config: Config) {
        self.lock().config = Arc::new(config.normalized());
        info!("config replaced");
    }

    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Files waiting to play, front first.
    pub fn queued_files(&self) -> Vec<PathBuf> {
        self.lock().queue.iter().map(|t| t.file.clone()).collect()
    }

    pub fn trigger_time_now(&self) {
        self.send(EngineCmd::TriggerTime);
    }

    pub fn trigger_noise_now(&self) {
        self.send(EngineCmd::TriggerNoise);
    }

    pub fn shutdown(&self) {
        self.send(EngineCmd::Shutdown);
    }
}

/// The clip currently rendering on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSession {
    pub kind: TaskKind,
    pub file: PathBuf,
    pub started_at: DateTime<Local>,
}

impl PlaybackSession {
    pub fn elapsed_ms(&self, now: DateTime<Local>) -> i64 {
        (now - self.started_at).num_milliseconds()
    }
}

pub struct Engine {
    handle: EngineHandle,
    rx: mpsc::UnboundedReceiver<EngineCmd>,
    device: Arc<dyn MediaDevice>,
    ducker: Ducker,
    session: Option<PlaybackSession>,
    monitoring: bool,
    triggers: TriggerState,
    temp_dir: PathBuf,
    status_tx: watch::Sender<StatusSnapshot>,
}

impl Engine {
    /// Build an idle engine. Merged announcements are written to `temp_dir`.
    pub fn new(config: Config, device: Arc<dyn MediaDevice>, temp_dir: PathBuf) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            config: Arc::new(config.normalized()),
            queue: TaskQueue::new(),
            picker: FilePicker::new(),
            busy: false,
            heartbeat: Heartbeat::default(),
        };
        let (status_tx, _) = watch::channel(StatusSnapshot::idle());
        Engine {
            handle: EngineHandle {
                shared: Arc::new(Mutex::new(shared)),
                tx,
            },
            rx,
            device,
            ducker: Ducker::new(),
            session: None,
            monitoring: false,
            triggers: TriggerState::new(Local::now()),
            temp_dir,
            status_tx,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Receive a fresh [`StatusSnapshot`] after every master tick.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status_tx.borrow().clone()
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.session.is_none() && !self.handle.lock().busy
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    pub fn ducker(&self) -> &Ducker {
        &self.ducker
    }

    pub fn triggers(&self) -> &TriggerState {
        &self.triggers
    }

    /// Clear leftover merge files and arm both countdowns.
    pub fn start_at(&mut self, now: DateTime<Local>) {
        let removed = wav::sweep_merged(&self.temp_dir, None);
        if removed > 0 {
            info!(removed, "removed stale announcement files");
        }
        let config = self.handle.config();
        self.triggers.reset_time(now, config.time_min, config.time_max);
        self.triggers.reset_noise(now, config.noise_min, config.noise_max);
    }

    /// Drive the engine until [`EngineHandle::shutdown`] is called.
    pub async fn run(mut self) {
        self.start_at(Local::now());

        let mut master = tokio::time::interval(MASTER_TICK);
        master.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut monitor = tokio::time::interval(MONITOR_TICK);
        monitor.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("engine started");
        loop {
            tokio::select! {
                cmd = self.rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle_cmd(cmd, Local::now()) {
                        break;
                    }
                }
                _ = master.tick() => self.master_tick_at(Local::now()),
                _ = monitor.tick(), if self.monitoring => self.monitor_tick_at(Local::now()),
            }
        }

        let config = self.handle.config();
        self.ducker.deactivate(self.device.as_ref());
        self.release_device(&config);
        info!("engine stopped");
    }

    /// Process queued commands without waiting. Returns false once a
    /// shutdown has been seen.
    pub fn drain_commands_at(&mut self, now: DateTime<Local>) -> bool {
        while let Ok(cmd) = self.rx.try_recv() {
            if !self.handle_cmd(cmd, now) {
                return false;
            }
        }
        true
    }

    fn handle_cmd(&mut self, cmd: EngineCmd, now: DateTime<Local>) -> bool {
        match cmd {
            EngineCmd::Dispatch => self.dispatch_at(now),
            EngineCmd::TriggerTime => self.fire_time_at(now),
            EngineCmd::TriggerNoise => self.fire_noise_at(now),
            EngineCmd::Shutdown => return false,
        }
        true
    }

    /// Play the next timely task, or go Idle when there is none.
    pub fn dispatch_at(&mut self, now: DateTime<Local>) {
        self.monitoring = false;
        self.session = None;

        loop {
            let (next, dropped, config) = {
                let mut shared = self.handle.lock();
                let (next, dropped) = shared.queue.pop_playable(now);
                if next.is_none() {
                    shared.busy = false;
                }
                (next, dropped, shared.config.clone())
            };

            for task in &dropped {
                warn!(file = %task.file_name(), "time announcement older than 30s, dropped");
            }

            let Some(task) = next else {
                self.go_idle(&config);
                return;
            };

            match self.start_playback(&task, &config, now) {
                Ok(()) => return,
                Err(e) => error!(error = %e, file = %task.file_name(), "cannot play, skipping"),
            }
        }
    }

    fn start_playback(&mut self, task: &Task, config: &Config, now: DateTime<Local>) -> Result<()> {
        if task.kind == TaskKind::Time {
            if let Some(stamp) = wav::merged_stamp(&task.file) {
                let removed = wav::sweep_merged(&self.temp_dir, Some(stamp));
                if removed > 0 {
                    debug!(removed, "expired older announcement files");
                }
            }
        }

        let name = config.media_source_name.as_str();
        self.device.state(name)?;

        self.ducker
            .activate(self.device.as_ref(), &config.duck_sources, config.duck_volume);

        self.device
            .set_file(name, Some(&task.file), LoadOptions::ONE_SHOT)?;
        self.device.set_muted(name, false)?;
        // Toggling enable restarts the source from the top.
        self.device.set_enabled(name, false)?;
        self.device.set_enabled(name, true)?;

        info!(kind = %task.kind, file = %task.file_name(), "playing");
        self.session = Some(PlaybackSession {
            kind: task.kind,
            file: task.file.clone(),
            started_at: now,
        });
        self.monitoring = true;
        Ok(())
    }

    fn go_idle(&mut self, config: &Config) {
        self.session = None;
        self.monitoring = false;
        self.ducker.deactivate(self.device.as_ref());
        self.release_device(config);
        debug!("queue empty, idle");
    }

    fn release_device(&self, config: &Config) {
        let name = config.media_source_name.as_str();
        let result = self
            .device
            .set_file(name, None, LoadOptions::ONE_SHOT)
            .and_then(|_| self.device.set_enabled(name, false))
            .and_then(|_| self.device.set_muted(name, true));
        if let Err(e) = result {
            debug!(error = %e, "could not reset media source");
        }
    }

    /// Poll the device for the in-flight clip (5 Hz while monitoring).
    pub fn monitor_tick_at(&mut self, now: DateTime<Local>) {
        let Some(session) = &self.session else {
            self.monitoring = false;
            return;
        };
        let elapsed = session.elapsed_ms(now);
        let config = self.handle.config();

        let state = match self.device.state(&config.media_source_name) {
            Ok(state) => state,
            Err(e) => {
                error!(error = %Error::from(e), "media source vanished during playback");
                self.dispatch_at(now);
                return;
            }
        };

        if elapsed > PLAYBACK_TIMEOUT_MS {
            let err = Error::PlaybackTimeout { elapsed_ms: elapsed };
            warn!(error = %err, file = %session.file.display(), "forcing next clip");
            self.dispatch_at(now);
            return;
        }

        if state.is_active() {
            return;
        }
        if state == MediaState::Ended || elapsed >= STARTUP_GRACE_MS {
            debug!(%state, elapsed, "clip finished");
            self.dispatch_at(now);
        }
    }

    /// Recover when the device stopped playing but nobody noticed.
    pub fn self_heal_at(&mut self, now: DateTime<Local>) {
        let Some(session) = &self.session else {
            return;
        };
        if session.elapsed_ms(now) <= SELF_HEAL_AFTER_MS {
            return;
        }
        let config = self.handle.config();
        let Ok(state) = self.device.state(&config.media_source_name) else {
            return;
        };
        if state.is_active() {
            return;
        }

        warn!(%state, file = %session.file.display(), "engine out of sync with device, forcing idle");
        self.session = None;
        self.monitoring = false;
        self.ducker.deactivate(self.device.as_ref());

        let kick = {
            let mut shared = self.handle.lock();
            shared.busy = !shared.queue.is_empty();
            shared.busy
        };
        if kick {
            self.handle.send(EngineCmd::Dispatch);
        }
    }

    /// The 1 Hz housekeeping pass: self-heal, publish status, fire triggers.
    pub fn master_tick_at(&mut self, now: DateTime<Local>) {
        self.self_heal_at(now);
        self.publish_status(now);

        let config = self.handle.config();
        if !config.enabled {
            return;
        }
        for trigger in self.triggers.due(now) {
            match trigger {
                Trigger::Time => {
                    self.fire_time_at(now);
                    self.triggers.reset_time(now, config.time_min, config.time_max);
                }
                Trigger::Noise => {
                    self.fire_noise_at(now);
                    self.triggers.reset_noise(now, config.noise_min, config.noise_max);
                }
            }
        }
    }

    fn publish_status(&mut self, now: DateTime<Local>) {
        let (queue_len, connected, config) = {
            let shared = self.handle.lock();
            (
                shared.queue.len(),
                shared.heartbeat.is_connected(now),
                shared.config.clone(),
            )
        };
        let state = match &self.session {
            Some(s) => EngineState::Playing(s.kind),
            None => EngineState::Idle,
        };
        let (next_time_secs, next_noise_secs) = self.triggers.remaining_secs(now);
        let snapshot = StatusSnapshot {
            state,
            message: status::status_message(state, queue_len),
            queue_len,
            next_time_secs,
            next_noise_secs,
            connected,
            noise_count: config
                .noise_dir()
                .map(|d| picker::count_audio_files(&d))
                .unwrap_or(0),
            voice_name: config.voice_name(),
        };
        self.status_tx.send_replace(snapshot);
    }

    /// Merge prefix/date/time fragments and queue the announcement.
    pub fn fire_time_at(&mut self, now: DateTime<Local>) {
        let config = self.handle.config();
        let Some(library) = config.voice_library() else {
            return;
        };
        let handle = self.handle.clone();
        let fragments = scheduler::time_fragments(library, now, |dir| handle.pick(dir, false));
        if fragments.is_empty() {
            debug!("no time fragments available");
            return;
        }

        match wav::merge(&fragments, &self.temp_dir, now.timestamp_millis()) {
            Ok(merged) => {
                if let Err(e) = self.handle.enqueue_at(&merged, TaskKind::Time, now) {
                    warn!(error = %e, "time announcement not queued");
                }
            }
            Err(e) => info!(error = %e, "time announcement skipped"),
        }
    }

    /// Queue one noise clip, chaining a second when the first is very short.
    pub fn fire_noise_at(&mut self, now: DateTime<Local>) {
        let config = self.handle.config();
        let Some(noise_dir) = config.noise_dir() else {
            return;
        };
        let Some(first) = self.handle.pick(&noise_dir, true) else {
            debug!(dir = %noise_dir.display(), "no noise clips available");
            return;
        };
        if let Err(e) = self.handle.enqueue_at(&first, TaskKind::Noise, now) {
            warn!(error = %e, "noise clip not queued");
            return;
        }

        let threshold = Duration::from_secs(config.short_clip_threshold_secs as u64);
        let short = wav::clip_duration(&first).is_some_and(|d| d < threshold);
        if short {
            if let Some(second) = self.handle.pick(&noise_dir, true) {
                if let Err(e) = self.handle.enqueue_at(&second, TaskKind::Noise, now) {
                    warn!(error = %e, "chained noise clip not queued");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;
    use chrono::TimeDelta;
    use std::fs;

    const CLIPS: &str = "Clips";

    struct Rig {
        engine: Engine,
        device: Arc<MemoryDevice>,
        dir: tempfile::TempDir,
    }

    fn rig() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let device = Arc::new(MemoryDevice::new());
        device.add_source(CLIPS, 1.0);
        device.add_source("Music", 0.8);
        let config = Config {
            media_source_name: CLIPS.into(),
            duck_sources: vec!["Music".into()],
            duck_volume: 0.2,
            ..Config::default()
        };
        let temp = dir.path().join("tmp");
        fs::create_dir(&temp).unwrap();
        let engine = Engine::new(config, device.clone(), temp);
        Rig { engine, device, dir }
    }

    fn clip(rig: &Rig, name: &str) -> PathBuf {
        let path = rig.dir.path().join(name);
        fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn enqueue_defers_dispatch_to_loop() {
        let mut rig = rig();
        let a = clip(&rig, "a.wav");
        let handle = rig.engine.handle();
        let now = Local::now();

        handle.enqueue_at(&a, TaskKind::Reply, now).unwrap();
        assert!(rig.engine.session().is_none());
        assert_eq!(handle.queue_len(), 1);

        assert!(rig.engine.drain_commands_at(now));
        assert_eq!(rig.engine.session().unwrap().file, a);
        assert_eq!(rig.device.source(CLIPS).unwrap().state, MediaState::Opening);
        assert!(rig.engine.is_monitoring());
    }

    #[test]
    fn enqueue_missing_input_is_empty() {
        let rig = rig();
        let handle = rig.engine.handle();
        let result = handle.enqueue(&rig.dir.path().join("nope.wav"), TaskKind::Reply);
        assert!(matches!(result, Err(Error::Empty(_))));
        let empty_dir = rig.dir.path().join("empty");
        fs::create_dir(&empty_dir).unwrap();
        assert!(handle.enqueue(&empty_dir, TaskKind::Reply).is_err());
    }

    #[test]
    fn only_one_dispatch_per_idle_period() {
        let mut rig = rig();
        let handle = rig.engine.handle();
        let now = Local::now();
        for name in ["a.wav", "b.wav", "c.wav"] {
            let path = clip(&rig, name);
            handle.enqueue_at(&path, TaskKind::Noise, now).unwrap();
        }
        rig.engine.drain_commands_at(now);
        assert_eq!(rig.device.loaded_files().len(), 1);
        assert_eq!(handle.queue_len(), 2);
    }

    #[test]
    fn monitor_advances_on_end_and_goes_idle() {
        let mut rig = rig();
        let handle = rig.engine.handle();
        let now = Local::now();
        let a = clip(&rig, "a.wav");
        let b = clip(&rig, "b.wav");
        handle.enqueue_at(&a, TaskKind::Noise, now).unwrap();
        handle.enqueue_at(&b, TaskKind::Noise, now).unwrap();
        rig.engine.drain_commands_at(now);

        rig.device.set_state(CLIPS, MediaState::Playing);
        rig.engine.monitor_tick_at(now + TimeDelta::milliseconds(200));
        assert_eq!(rig.engine.session().unwrap().file, a);

        rig.device.set_state(CLIPS, MediaState::Ended);
        rig.engine.monitor_tick_at(now + TimeDelta::milliseconds(400));
        assert_eq!(rig.engine.session().unwrap().file, b);
        // Still ducked between clips.
        assert_eq!(rig.device.volume("Music").unwrap(), 0.2);

        rig.device.set_state(CLIPS, MediaState::Ended);
        rig.engine.monitor_tick_at(now + TimeDelta::milliseconds(600));
        assert!(rig.engine.is_idle());
        assert!(!rig.engine.ducker().is_active());
        assert_eq!(rig.device.volume("Music").unwrap(), 0.8);
        let src = rig.device.source(CLIPS).unwrap();
        assert!(src.file.is_none() && !src.enabled && src.muted);
    }

    #[test]
    fn grace_period_then_finished() {
        let mut rig = rig();
        let handle = rig.engine.handle();
        let now = Local::now();
        handle.enqueue_at(&clip(&rig, "a.wav"), TaskKind::Reply, now).unwrap();
        rig.engine.drain_commands_at(now);

        rig.device.set_state(CLIPS, MediaState::Idle);
        rig.engine.monitor_tick_at(now + TimeDelta::milliseconds(1_800));
        assert!(rig.engine.session().is_some());

        rig.engine.monitor_tick_at(now + TimeDelta::milliseconds(2_000));
        assert!(rig.engine.is_idle());
    }

    #[test]
    fn hard_timeout_advances_even_while_playing() {
        let mut rig = rig();
        let handle = rig.engine.handle();
        let now = Local::now();
        handle.enqueue_at(&clip(&rig, "long.wav"), TaskKind::Reply, now).unwrap();
        rig.engine.drain_commands_at(now);
        rig.device.set_state(CLIPS, MediaState::Playing);

        rig.engine.monitor_tick_at(now + TimeDelta::milliseconds(60_000));
        assert!(rig.engine.session().is_some());
        rig.engine.monitor_tick_at(now + TimeDelta::milliseconds(60_001));
        assert!(rig.engine.is_idle());
    }

    #[test]
    fn stale_time_task_never_reaches_device() {
        let mut rig = rig();
        let handle = rig.engine.handle();
        let now = Local::now();
        let t = clip(&rig, "announce.wav");
        let n = clip(&rig, "noise.wav");
        handle.enqueue_at(&t, TaskKind::Time, now - TimeDelta::seconds(31)).unwrap();
        handle.enqueue_at(&n, TaskKind::Noise, now).unwrap();

        rig.engine.drain_commands_at(now);
        assert_eq!(rig.device.loaded_files(), vec![n]);
    }

    #[test]
    fn missing_media_source_skips_queue_without_ducking() {
        let mut rig = rig();
        rig.device.remove_source(CLIPS);
        let handle = rig.engine.handle();
        let now = Local::now();
        handle.enqueue_at(&clip(&rig, "a.wav"), TaskKind::Reply, now).unwrap();
        handle.enqueue_at(&clip(&rig, "b.wav"), TaskKind::Reply, now).unwrap();

        rig.engine.drain_commands_at(now);
        assert!(rig.engine.is_idle());
        assert_eq!(handle.queue_len(), 0);
        assert_eq!(rig.device.volume("Music").unwrap(), 0.8);
    }

    #[test]
    fn source_vanishing_mid_play_advances() {
        let mut rig = rig();
        let handle = rig.engine.handle();
        let now = Local::now();
        handle.enqueue_at(&clip(&rig, "a.wav"), TaskKind::Reply, now).unwrap();
        rig.engine.drain_commands_at(now);

        rig.device.remove_source(CLIPS);
        rig.engine.monitor_tick_at(now + TimeDelta::milliseconds(200));
        assert!(rig.engine.is_idle());
        assert_eq!(rig.device.volume("Music").unwrap(), 0.8);
    }

    #[test]
    fn self_heal_forces_idle_without_monitor() {
        let mut rig = rig();
        let handle = rig.engine.handle();
        let now = Local::now();
        handle.enqueue_at(&clip(&rig, "a.wav"), TaskKind::Noise, now).unwrap();
        rig.engine.drain_commands_at(now);
        assert!(rig.engine.ducker().is_active());

        rig.device.set_state(CLIPS, MediaState::Idle);
        rig.engine.master_tick_at(now + TimeDelta::milliseconds(6_000));
        assert!(rig.engine.is_idle());
        assert!(!rig.engine.is_monitoring());
        assert!(!rig.engine.ducker().is_active());
        assert_eq!(rig.device.volume("Music").unwrap(), 0.8);
    }

    #[test]
    fn self_heal_leaves_healthy_sessions_alone() {
        let mut rig = rig();
        let handle = rig.engine.handle();
        let now = Local::now();
        handle.enqueue_at(&clip(&rig, "a.wav"), TaskKind::Noise, now).unwrap();
        rig.engine.drain_commands_at(now);

        rig.device.set_state(CLIPS, MediaState::Idle);
        rig.engine.self_heal_at(now + TimeDelta::milliseconds(5_000));
        assert!(rig.engine.session().is_some());

        rig.device.set_state(CLIPS, MediaState::Buffering);
        rig.engine.self_heal_at(now + TimeDelta::milliseconds(9_000));
        assert!(rig.engine.session().is_some());
    }

    #[test]
    fn status_reflects_session_and_backlog() {
        let mut rig = rig();
        let handle = rig.engine.handle();
        let now = Local::now();
        rig.engine.start_at(now);
        handle.enqueue_at(&clip(&rig, "a.wav"), TaskKind::Reply, now).unwrap();
        handle.enqueue_at(&clip(&rig, "b.wav"), TaskKind::Reply, now).unwrap();
        rig.engine.drain_commands_at(now);
        rig.device.set_state(CLIPS, MediaState::Playing);

        handle.record_heartbeat_at(now);
        rig.engine.master_tick_at(now);
        let status = rig.engine.status();
        assert_eq!(status.state.to_string(), "playing_reply");
        assert_eq!(status.message, "Running audio task (+1)");
        assert!(status.connected);
        assert!((120..=180).contains(&status.next_time_secs));
        assert!((90..=120).contains(&status.next_noise_secs));

        rig.engine.master_tick_at(now + TimeDelta::seconds(10));
        assert!(!rig.engine.status().connected);
    }

    #[test]
    fn start_sweeps_merge_leftovers() {
        let mut rig = rig();
        let temp = rig.dir.path().join("tmp");
        fs::write(temp.join(wav::merged_file_name(1)), b"x").unwrap();
        rig.engine.start_at(Local::now());
        assert_eq!(fs::read_dir(&temp).unwrap().count(), 0);
    }

    #[test]
    fn disabled_config_fires_nothing() {
        let mut rig = rig();
        let handle = rig.engine.handle();
        let lib = rig.dir.path().join("voices");
        fs::create_dir_all(lib.join("noise")).unwrap();
        fs::write(lib.join("noise/n.mp3"), b"x").unwrap();
        handle.set_config(Config {
            enabled: false,
            media_source_name: CLIPS.into(),
            voice_pack_path: lib.to_string_lossy().to_string(),
            ..Config::default()
        });

        let now = Local::now();
        rig.engine.master_tick_at(now + TimeDelta::seconds(1_000));
        assert_eq!(handle.queue_len(), 0);
        assert_eq!(rig.engine.status().noise_count, 1);
        assert_eq!(rig.engine.status().voice_name, "voices");
    }

    #[test]
    fn shutdown_stops_draining() {
        let mut rig = rig();
        rig.engine.handle().shutdown();
        assert!(!rig.engine.drain_commands_at(Local::now()));
    }
}
