//! The media device the engine renders clips through.
//!
//! The engine only ever talks to the host through [`MediaDevice`]. Every call
//! is addressed by source name and may answer [`DeviceError::NotFound`].
//! Calls must return promptly: the engine never waits on the device, it
//! polls [`MediaDevice::state`] instead.

use crate::error::DeviceError;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Playback state as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaState {
    Idle,
    Opening,
    Buffering,
    Playing,
    Ended,
    Error,
}

impl MediaState {
    /// True while the device is (or is about to be) producing audio.
    pub fn is_active(self) -> bool {
        matches!(self, MediaState::Playing | MediaState::Opening | MediaState::Buffering)
    }
}

impl fmt::Display for MediaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MediaState::Idle => "idle",
            MediaState::Opening => "opening",
            MediaState::Buffering => "buffering",
            MediaState::Playing => "playing",
            MediaState::Ended => "ended",
            MediaState::Error => "error",
        };
        f.write_str(s)
    }
}

/// How a loaded file should behave once the source is activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub looping: bool,
    pub close_when_inactive: bool,
    pub restart_on_activate: bool,
}

impl LoadOptions {
    /// Play once from the top every time the source is enabled.
    pub const ONE_SHOT: LoadOptions = LoadOptions {
        looping: false,
        close_when_inactive: true,
        restart_on_activate: true,
    };
}

pub trait MediaDevice: Send + Sync {
    /// Load `file` into the named source, or clear it with `None`.
    fn set_file(&self, name: &str, file: Option<&Path>, options: LoadOptions) -> Result<(), DeviceError>;
    fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), DeviceError>;
    fn set_muted(&self, name: &str, muted: bool) -> Result<(), DeviceError>;
    fn state(&self, name: &str) -> Result<MediaState, DeviceError>;
    fn volume(&self, name: &str) -> Result<f32, DeviceError>;
    fn set_volume(&self, name: &str, volume: f32) -> Result<(), DeviceError>;
}

/// One source tracked by [`MemoryDevice`].
#[derive(Debug, Clone, PartialEq)]
pub struct SourceState {
    pub file: Option<PathBuf>,
    pub enabled: bool,
    pub muted: bool,
    pub volume: f32,
    pub state: MediaState,
}

impl Default for SourceState {
    fn default() -> Self {
        SourceState {
            file: None,
            enabled: false,
            muted: false,
            volume: 1.0,
            state: MediaState::Idle,
        }
    }
}

/// A device that renders nothing and keeps its sources in memory.
///
/// Enabling a source with a file moves it to `Opening`; everything after
/// that is scripted with [`MemoryDevice::set_state`]. Used for dry runs and
/// by the test suite.
#[derive(Debug, Default)]
pub struct MemoryDevice {
    sources: Mutex<HashMap<String, SourceState>>,
    loads: Mutex<Vec<PathBuf>>,
}

impl MemoryDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source so calls addressed to it succeed.
    pub fn add_source(&self, name: &str, volume: f32) {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        sources.insert(
            name.to_string(),
            SourceState {
                volume,
                ..SourceState::default()
            },
        );
    }

    pub fn remove_source(&self, name: &str) {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        sources.remove(name);
    }

    /// Force the reported playback state of a source.
    pub fn set_state(&self, name: &str, state: MediaState) {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(src) = sources.get_mut(name) {
            src.state = state;
        }
    }

    pub fn source(&self, name: &str) -> Option<SourceState> {
        let sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        sources.get(name).cloned()
    }

    /// Every file loaded so far, in order.
    pub fn loaded_files(&self) -> Vec<PathBuf> {
        self.loads.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn with_source<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut SourceState) -> T,
    ) -> Result<T, DeviceError> {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        sources
            .get_mut(name)
            .map(f)
            .ok_or_else(|| DeviceError::NotFound(name.to_string()))
    }
}

impl MediaDevice for MemoryDevice {
    fn set_file(&self, name: &str, file: Option<&Path>, _options: LoadOptions) -> Result<(), DeviceError> {
        self.with_source(name, |src| {
            src.file = file.map(Path::to_path_buf);
            src.state = MediaState::Idle;
        })?;
        if let Some(path) = file {
            self.loads
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(path.to_path_buf());
        }
        Ok(())
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), DeviceError> {
        self.with_source(name, |src| {
            src.enabled = enabled;
            src.state = match (enabled, src.file.is_some()) {
                (true, true) => MediaState::Opening,
                _ => MediaState::Idle,
            };
        })
    }

    fn set_muted(&self, name: &str, muted: bool) -> Result<(), DeviceError> {
        self.with_source(name, |src| src.muted = muted)
    }

    fn state(&self, name: &str) -> Result<MediaState, DeviceError> {
        self.with_source(name, |src| src.state)
    }

    fn volume(&self, name: &str) -> Result<f32, DeviceError> {
        self.with_source(name, |src| src.volume)
    }

    fn set_volume(&self, name: &str, volume: f32) -> Result<(), DeviceError> {
        self.with_source(name, |src| src.volume = volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_states() {
        assert!(MediaState::Playing.is_active());
        assert!(MediaState::Opening.is_active());
        assert!(MediaState::Buffering.is_active());
        assert!(!MediaState::Ended.is_active());
        assert!(!MediaState::Idle.is_active());
        assert!(!MediaState::Error.is_active());
    }

    #[test]
    fn unknown_source_is_not_found() {
        let dev = MemoryDevice::new();
        assert_eq!(dev.state("ghost"), Err(DeviceError::NotFound("ghost".into())));
        assert!(dev.set_volume("ghost", 0.5).is_err());
    }

    #[test]
    fn enable_with_file_opens() {
        let dev = MemoryDevice::new();
        dev.add_source("Clips", 1.0);
        dev.set_file("Clips", Some(Path::new("a.wav")), LoadOptions::ONE_SHOT)
            .unwrap();
        assert_eq!(dev.state("Clips").unwrap(), MediaState::Idle);
        dev.set_enabled("Clips", true).unwrap();
        assert_eq!(dev.state("Clips").unwrap(), MediaState::Opening);
        dev.set_file("Clips", None, LoadOptions::ONE_SHOT).unwrap();
        dev.set_enabled("Clips", true).unwrap();
        assert_eq!(dev.state("Clips").unwrap(), MediaState::Idle);
        assert_eq!(dev.loaded_files(), vec![PathBuf::from("a.wav")]);
    }
}
