use chrono::{DateTime, Local, TimeDelta};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;

/// `Time` tasks older than this when reached are no longer timely.
pub const TIME_TASK_MAX_AGE_SECS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Merged date/time announcement.
    Time,
    /// Ambient filler clip.
    Noise,
    /// Clip requested over HTTP.
    Reply,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Time => write!(f, "time"),
            TaskKind::Noise => write!(f, "noise"),
            TaskKind::Reply => write!(f, "reply"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub file: PathBuf,
    pub kind: TaskKind,
    pub enqueued_at: DateTime<Local>,
}

impl Task {
    pub fn new(file: PathBuf, kind: TaskKind, enqueued_at: DateTime<Local>) -> Self {
        Task { file, kind, enqueued_at }
    }

    /// True for announcements that sat in the queue too long to still be right.
    pub fn is_stale(&self, now: DateTime<Local>) -> bool {
        self.kind == TaskKind::Time
            && now - self.enqueued_at > TimeDelta::seconds(TIME_TASK_MAX_AGE_SECS)
    }

    pub fn file_name(&self) -> String {
        self.file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// FIFO of pending clips.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: VecDeque<Task>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: Task) {
        self.tasks.push_back(task);
    }

    /// Pop the first task still worth playing at `now`.
    ///
    /// Stale announcements in front of it are removed and handed back so the
    /// caller can report them.
    pub fn pop_playable(&mut self, now: DateTime<Local>) -> (Option<Task>, Vec<Task>) {
        let mut dropped = Vec::new();
        while let Some(task) = self.tasks.pop_front() {
            if task.is_stale(now) {
                dropped.push(task);
                continue;
            }
            return (Some(task), dropped);
        }
        (None, dropped)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }
}
