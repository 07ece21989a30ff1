//! Random clip selection with a short memory of recent picks.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

/// Extensions eligible for playback.
pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3"];

/// Redraws allowed before a repeat is accepted anyway.
const MAX_REDRAWS: usize = 20;

/// Bounded record of recently accepted picks, oldest first.
#[derive(Debug, Clone, Default)]
pub struct HistoryRing {
    entries: VecDeque<PathBuf>,
}

impl HistoryRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.iter().any(|p| p == path)
    }

    /// Record a pick, evicting the oldest entries past `capacity`.
    pub fn push(&mut self, path: PathBuf, capacity: usize) {
        self.entries.push_back(path);
        while self.entries.len() > capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// List playable files directly inside `dir`, sorted by name.
pub fn list_audio_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .is_some_and(|e| AUDIO_EXTENSIONS.contains(&e.as_str()))
        })
        .collect();
    files.sort();
    files
}

/// Count playable files in `dir` (0 when missing).
pub fn count_audio_files(dir: &Path) -> usize {
    list_audio_files(dir).len()
}

/// Picks files at random, keeping one history ring per directory.
#[derive(Debug)]
pub struct FilePicker {
    rng: fastrand::Rng,
    histories: HashMap<PathBuf, HistoryRing>,
}

impl FilePicker {
    pub fn new() -> Self {
        FilePicker {
            rng: fastrand::Rng::new(),
            histories: HashMap::new(),
        }
    }

    /// Deterministic picker for tests and reproducible runs.
    pub fn with_seed(seed: u64) -> Self {
        FilePicker {
            rng: fastrand::Rng::with_seed(seed),
            histories: HashMap::new(),
        }
    }

    /// Pick one playable file from `dir`.
    pub fn pick(&mut self, dir: &Path, use_history: bool, history_size: usize) -> Option<PathBuf> {
        let files = list_audio_files(dir);
        self.pick_from(dir, &files, use_history, history_size)
    }

    /// Pick from an already listed pool belonging to `dir`.
    ///
    /// History only applies when the pool is larger than the ring; with
    /// fewer files than that, avoiding repeats is not possible anyway.
    pub fn pick_from(
        &mut self,
        dir: &Path,
        files: &[PathBuf],
        use_history: bool,
        history_size: usize,
    ) -> Option<PathBuf> {
        if files.is_empty() {
            return None;
        }
        if !use_history || files.len() <= history_size {
            return Some(files[self.rng.usize(..files.len())].clone());
        }

        let history = self.histories.entry(dir.to_path_buf()).or_default();
        let mut picked = &files[self.rng.usize(..files.len())];
        let mut redraws = 1;
        while history.contains(picked) && redraws < MAX_REDRAWS {
            picked = &files[self.rng.usize(..files.len())];
            redraws += 1;
        }

        history.push(picked.clone(), history_size);
        Some(picked.clone())
    }

    pub fn history(&self, dir: &Path) -> Option<&HistoryRing> {
        self.histories.get(dir)
    }
}

impl Default for FilePicker {
    fn default() -> Self {
        Self::new()
    }
}
