//! signalCue: audio injection engine for live rooms.
//!
//! Time announcements, ambient noise and on-demand reply clips are queued
//! and rendered one at a time through a media device while background
//! sources are ducked. The `signalcue` binary and the HTTP boundary consume
//! this crate.

pub mod audio_runtime;
pub mod config;
pub mod device;
pub mod ducking;
pub mod engine;
pub mod error;
pub mod http;
pub mod picker;
pub mod player;
pub mod scheduler;
pub mod status;
pub mod task;
pub mod wav;
