//! Randomized countdowns for the automatic time and noise events.

use chrono::{DateTime, Local, TimeDelta};
use std::path::{Path, PathBuf};

/// Which automatic event came due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Time,
    Noise,
}

/// Next firing instants for both events.
#[derive(Debug)]
pub struct TriggerState {
    pub next_time_at: DateTime<Local>,
    pub next_noise_at: DateTime<Local>,
    rng: fastrand::Rng,
}

/// Draw a whole number of seconds uniformly from `min..=max`.
pub fn draw_interval(rng: &mut fastrand::Rng, min: u32, max: u32) -> u32 {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    rng.u32(lo..=hi)
}

impl TriggerState {
    /// Both countdowns start at `now`; call the reset methods to arm them.
    pub fn new(now: DateTime<Local>) -> Self {
        TriggerState {
            next_time_at: now,
            next_noise_at: now,
            rng: fastrand::Rng::new(),
        }
    }

    pub fn with_seed(now: DateTime<Local>, seed: u64) -> Self {
        TriggerState {
            rng: fastrand::Rng::with_seed(seed),
            ..TriggerState::new(now)
        }
    }

    pub fn reset_time(&mut self, now: DateTime<Local>, min: u32, max: u32) {
        let secs = draw_interval(&mut self.rng, min, max);
        self.next_time_at = now + TimeDelta::seconds(secs as i64);
    }

    pub fn reset_noise(&mut self, now: DateTime<Local>, min: u32, max: u32) {
        let secs = draw_interval(&mut self.rng, min, max);
        self.next_noise_at = now + TimeDelta::seconds(secs as i64);
    }

    /// Events whose countdown has run out at `now`, time first.
    pub fn due(&self, now: DateTime<Local>) -> Vec<Trigger> {
        let mut due = Vec::new();
        if now >= self.next_time_at {
            due.push(Trigger::Time);
        }
        if now >= self.next_noise_at {
            due.push(Trigger::Noise);
        }
        due
    }

    /// Whole seconds until each event (may be negative while disabled).
    pub fn remaining_secs(&self, now: DateTime<Local>) -> (i64, i64) {
        (
            (self.next_time_at - now).num_seconds(),
            (self.next_noise_at - now).num_seconds(),
        )
    }
}

/// Fragments making up a time announcement at `now`, in playback order.
///
/// A random clip from `prefix/`, then `date/MMDD.wav` and `time/HHMM.wav`
/// when those exist. Empty when the library has none of them. `pick` chooses
/// one file from the prefix directory.
pub fn time_fragments(
    library: &Path,
    now: DateTime<Local>,
    pick: impl FnOnce(&Path) -> Option<PathBuf>,
) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Some(prefix) = pick(&library.join("prefix")) {
        files.push(prefix);
    }
    let date = library
        .join("date")
        .join(format!("{}.wav", now.format("%m%d")));
    if date.is_file() {
        files.push(date);
    }
    let time = library
        .join("time")
        .join(format!("{}.wav", now.format("%H%M")));
    if time.is_file() {
        files.push(time);
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picker::FilePicker;
    use chrono::TimeZone;
    use std::fs;

    #[test]
    fn reset_stays_within_inclusive_bounds() {
        let now = Local::now();
        let mut triggers = TriggerState::with_seed(now, 9);
        let mut seen_min = false;
        let mut seen_max = false;
        for _ in 0..2_000 {
            triggers.reset_time(now, 3, 6);
            triggers.reset_noise(now, 90, 120);
            let (t, n) = triggers.remaining_secs(now);
            assert!((3..=6).contains(&t));
            assert!((90..=120).contains(&n));
            seen_min |= t == 3;
            seen_max |= t == 6;
        }
        assert!(seen_min && seen_max);
    }

    #[test]
    fn degenerate_range_is_exact() {
        let now = Local::now();
        let mut triggers = TriggerState::with_seed(now, 1);
        triggers.reset_noise(now, 45, 45);
        assert_eq!(triggers.remaining_secs(now).1, 45);
    }

    #[test]
    fn due_reports_each_countdown_independently() {
        let now = Local::now();
        let mut triggers = TriggerState::with_seed(now, 2);
        assert_eq!(triggers.due(now), vec![Trigger::Time, Trigger::Noise]);

        triggers.reset_time(now, 10, 10);
        assert_eq!(triggers.due(now), vec![Trigger::Noise]);
        assert_eq!(
            triggers.due(now + TimeDelta::seconds(10)),
            vec![Trigger::Time, Trigger::Noise]
        );
    }

    #[test]
    fn fragments_follow_clock_names() {
        let lib = tempfile::tempdir().unwrap();
        for sub in ["prefix", "date", "time"] {
            fs::create_dir(lib.path().join(sub)).unwrap();
        }
        fs::write(lib.path().join("prefix/hello.wav"), b"x").unwrap();
        fs::write(lib.path().join("date/0314.wav"), b"x").unwrap();
        fs::write(lib.path().join("time/0905.wav"), b"x").unwrap();

        let now = Local.with_ymd_and_hms(2026, 3, 14, 9, 5, 0).unwrap();
        let mut picker = FilePicker::with_seed(4);
        let files = time_fragments(lib.path(), now, |d| picker.pick(d, false, 0));
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["hello.wav", "0314.wav", "0905.wav"]);

        let later = Local.with_ymd_and_hms(2026, 3, 15, 9, 6, 0).unwrap();
        assert_eq!(time_fragments(lib.path(), later, |d| picker.pick(d, false, 0)).len(), 1);
    }

    #[test]
    fn empty_library_has_no_fragments() {
        let lib = tempfile::tempdir().unwrap();
        let mut picker = FilePicker::with_seed(4);
        assert!(time_fragments(lib.path(), Local::now(), |d| picker.pick(d, false, 0)).is_empty());
    }
}
