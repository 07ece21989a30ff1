//! Error types for signalCue.
//!
//! Nothing in here is fatal to the process: callers log these and either
//! advance the queue or fall back to defaults.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Bytes that are not a well-formed RIFF/WAVE container.
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    /// No playable result (empty directory, nothing to merge, ...).
    #[error("Nothing to play: {0}")]
    Empty(String),

    /// The named media device or source is missing.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The device answered but refused the request.
    #[error("Device error: {0}")]
    Device(String),

    /// A clip stayed in flight past the hard timeout.
    #[error("Playback timed out after {elapsed_ms} ms")]
    PlaybackTimeout { elapsed_ms: i64 },

    /// The config file could not be read or parsed.
    #[error("Config load failed for '{path}': {reason}")]
    ConfigLoad { path: PathBuf, reason: String },

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a media device call that did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("source '{0}' not found")]
    NotFound(String),

    #[error("device backend error: {0}")]
    Backend(String),
}

impl From<DeviceError> for Error {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::NotFound(name) => Error::DeviceNotFound(name),
            DeviceError::Backend(msg) => Error::Device(msg),
        }
    }
}
