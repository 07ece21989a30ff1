//! Engine status snapshots and external liveness tracking.

use crate::task::TaskKind;
use chrono::{DateTime, Local, TimeDelta};
use serde::{Serialize, Serializer};
use std::fmt;

/// Pings older than this mean the external client is gone.
pub const HEARTBEAT_TIMEOUT_SECS: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Playing(TaskKind),
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Playing(kind) => write!(f, "playing_{}", kind),
        }
    }
}

impl Serialize for EngineState {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

/// Last time an external client checked in.
#[derive(Debug, Clone, Copy, Default)]
pub struct Heartbeat {
    last_ping_at: Option<DateTime<Local>>,
}

impl Heartbeat {
    pub fn record(&mut self, now: DateTime<Local>) {
        self.last_ping_at = Some(now);
    }

    pub fn is_connected(&self, now: DateTime<Local>) -> bool {
        self.last_ping_at
            .is_some_and(|at| now - at < TimeDelta::seconds(HEARTBEAT_TIMEOUT_SECS))
    }
}

/// What the dashboard shows, refreshed once per master tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub state: EngineState,
    pub message: String,
    pub queue_len: usize,
    pub next_time_secs: i64,
    pub next_noise_secs: i64,
    pub connected: bool,
    pub noise_count: usize,
    pub voice_name: String,
}

impl StatusSnapshot {
    pub fn idle() -> Self {
        StatusSnapshot {
            state: EngineState::Idle,
            message: status_message(EngineState::Idle, 0),
            queue_len: 0,
            next_time_secs: 0,
            next_noise_secs: 0,
            connected: false,
            noise_count: 0,
            voice_name: "Default".to_string(),
        }
    }
}

/// Human readable status line, with the backlog appended when non-empty.
pub fn status_message(state: EngineState, queue_len: usize) -> String {
    let mut msg = match state {
        EngineState::Idle => "Monitoring the live room...".to_string(),
        EngineState::Playing(_) => "Running audio task".to_string(),
    };
    if queue_len > 0 {
        msg.push_str(&format!(" (+{})", queue_len));
    }
    msg
}
