//! Attenuates auxiliary sources while injected clips play.
//!
//! The snapshot of original levels outlives individual clips: it is taken
//! the first time a source is ducked and only released when the queue runs
//! dry, so back-to-back clips never bounce the level up and down.

use crate::device::MediaDevice;
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct Ducker {
    snapshot: BTreeMap<String, f32>,
}

impl Ducker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lower every listed source to `level`, remembering its prior level
    /// the first time it is seen. Missing sources are skipped.
    pub fn activate(&mut self, device: &dyn MediaDevice, sources: &[String], level: f32) {
        for name in sources {
            if !self.snapshot.contains_key(name) {
                match device.volume(name) {
                    Ok(vol) => {
                        self.snapshot.insert(name.clone(), vol);
                    }
                    Err(e) => {
                        debug!(source = %name, error = %e, "duck source unavailable");
                        continue;
                    }
                }
            }
            if let Err(e) = device.set_volume(name, level) {
                warn!(source = %name, error = %e, "failed to duck source");
            }
        }
    }

    /// Put every snapshotted source back to its original level and forget them.
    pub fn deactivate(&mut self, device: &dyn MediaDevice) {
        for (name, vol) in std::mem::take(&mut self.snapshot) {
            if let Err(e) = device.set_volume(&name, vol) {
                warn!(source = %name, error = %e, "failed to restore source level");
            }
        }
    }

    pub fn is_active(&self) -> bool {
        !self.snapshot.is_empty()
    }

    /// Level recorded for `name` before it was ducked.
    pub fn original_level(&self, name: &str) -> Option<f32> {
        self.snapshot.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;

    fn sources(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn activate_then_deactivate_restores_levels() {
        let dev = MemoryDevice::new();
        dev.add_source("Music", 0.8);
        dev.add_source("Mic", 0.6);
        let mut ducker = Ducker::new();

        ducker.activate(&dev, &sources(&["Music", "Mic"]), 0.2);
        assert_eq!(dev.volume("Music").unwrap(), 0.2);
        assert_eq!(dev.volume("Mic").unwrap(), 0.2);
        assert!(ducker.is_active());

        ducker.deactivate(&dev);
        assert_eq!(dev.volume("Music").unwrap(), 0.8);
        assert_eq!(dev.volume("Mic").unwrap(), 0.6);
        assert!(!ducker.is_active());
    }

    #[test]
    fn repeated_activation_keeps_first_snapshot() {
        let dev = MemoryDevice::new();
        dev.add_source("Music", 0.9);
        let mut ducker = Ducker::new();
        let list = sources(&["Music"]);

        ducker.activate(&dev, &list, 0.3);
        ducker.activate(&dev, &list, 0.3);
        assert_eq!(ducker.original_level("Music"), Some(0.9));

        ducker.deactivate(&dev);
        assert_eq!(dev.volume("Music").unwrap(), 0.9);
    }

    #[test]
    fn missing_sources_are_skipped() {
        let dev = MemoryDevice::new();
        dev.add_source("Music", 0.5);
        let mut ducker = Ducker::new();
        ducker.activate(&dev, &sources(&["Ghost", "Music"]), 0.1);
        assert_eq!(ducker.original_level("Ghost"), None);
        assert_eq!(dev.volume("Music").unwrap(), 0.1);
        ducker.deactivate(&dev);
        assert_eq!(dev.volume("Music").unwrap(), 0.5);
    }
}
