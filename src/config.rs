use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const CONFIG_FILE: &str = "signalcue-config.json";

/// Operator settings. Every field falls back to its default when missing
/// from the JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Master switch for the automatic time/noise triggers.
    #[serde(default = "default_true", rename = "scriptEnabled")]
    pub enabled: bool,
    /// Name of the media source clips are rendered through.
    #[serde(default)]
    pub media_source_name: String,
    /// Root of the voice library (prefix/, date/, time/, noise/).
    #[serde(default)]
    pub voice_pack_path: String,
    #[serde(default = "default_time_min")]
    pub time_min: u32,
    #[serde(default = "default_time_max")]
    pub time_max: u32,
    #[serde(default = "default_noise_min")]
    pub noise_min: u32,
    #[serde(default = "default_noise_max")]
    pub noise_max: u32,
    /// Recent noise picks to avoid repeating.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// Noise clips shorter than this (seconds) get a second clip chained.
    #[serde(default = "default_short_threshold", rename = "shortFileThreshold")]
    pub short_clip_threshold_secs: u32,
    /// Sources lowered while a clip plays.
    #[serde(default)]
    pub duck_sources: Vec<String>,
    #[serde(default = "default_duck_volume")]
    pub duck_volume: f32,
}

fn default_true() -> bool {
    true
}

fn default_time_min() -> u32 {
    120
}

fn default_time_max() -> u32 {
    180
}

fn default_noise_min() -> u32 {
    90
}

fn default_noise_max() -> u32 {
    120
}

fn default_history_size() -> usize {
    30
}

fn default_short_threshold() -> u32 {
    6
}

fn default_duck_volume() -> f32 {
    0.2
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enabled: true,
            media_source_name: String::new(),
            voice_pack_path: String::new(),
            time_min: default_time_min(),
            time_max: default_time_max(),
            noise_min: default_noise_min(),
            noise_max: default_noise_max(),
            history_size: default_history_size(),
            short_clip_threshold_secs: default_short_threshold(),
            duck_sources: Vec::new(),
            duck_volume: default_duck_volume(),
        }
    }
}

impl Config {
    /// Default location under the user's config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("signalcue")
            .join(CONFIG_FILE)
    }

    /// Read and parse a config file.
    pub fn try_load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| Error::ConfigLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: Config = serde_json::from_str(&data).map_err(|e| Error::ConfigLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(config.normalized())
    }

    /// Load config from JSON, or fall back to defaults if missing or corrupt.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(config) => {
                info!(path = %path.display(), "loaded config");
                config
            }
            Err(e) => {
                warn!(error = %e, "using default config");
                Config::default()
            }
        }
    }

    /// Persist as pretty JSON, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Swap inverted interval bounds and clamp the duck level into 0..=1.
    pub fn normalized(mut self) -> Self {
        if self.time_min > self.time_max {
            std::mem::swap(&mut self.time_min, &mut self.time_max);
        }
        if self.noise_min > self.noise_max {
            std::mem::swap(&mut self.noise_min, &mut self.noise_max);
        }
        self.duck_volume = self.duck_volume.clamp(0.0, 1.0);
        self
    }

    pub fn voice_library(&self) -> Option<&Path> {
        if self.voice_pack_path.is_empty() {
            None
        } else {
            Some(Path::new(&self.voice_pack_path))
        }
    }

    pub fn noise_dir(&self) -> Option<PathBuf> {
        self.voice_library().map(|root| root.join("noise"))
    }

    /// Display name of the active voice library (its folder name).
    pub fn voice_name(&self) -> String {
        self.voice_library()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "Default".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_documented_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(config.enabled);
        assert_eq!(config.time_min, 120);
        assert_eq!(config.time_max, 180);
        assert_eq!(config.noise_min, 90);
        assert_eq!(config.noise_max, 120);
        assert_eq!(config.history_size, 30);
        assert_eq!(config.short_clip_threshold_secs, 6);
        assert_eq!(config.duck_volume, 0.2);
        assert!(config.duck_sources.is_empty());
    }

    #[test]
    fn reads_camel_case_fields() {
        let json = r#"{
            "mediaSourceName": "Clips",
            "voicePackPath": "/voices/anna",
            "timeMin": 10,
            "timeMax": 20,
            "historySize": 5,
            "shortFileThreshold": 3,
            "duckSources": ["Music", "Mic"],
            "duckVolume": 0.35
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.media_source_name, "Clips");
        assert_eq!(config.time_min, 10);
        assert_eq!(config.noise_min, 90);
        assert_eq!(config.history_size, 5);
        assert_eq!(config.short_clip_threshold_secs, 3);
        assert_eq!(config.duck_sources, vec!["Music", "Mic"]);
        assert_eq!(config.voice_name(), "anna");
    }

    #[test]
    fn load_falls_back_on_missing_or_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert_eq!(Config::load(&missing), Config::default());
        assert!(matches!(Config::try_load(&missing), Err(Error::ConfigLoad { .. })));

        let corrupt = dir.path().join("bad.json");
        fs::write(&corrupt, "{ not json").unwrap();
        assert_eq!(Config::load(&corrupt), Config::default());
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let config = Config {
            media_source_name: "Clips".into(),
            duck_sources: vec!["Music".into()],
            noise_min: 30,
            noise_max: 45,
            ..Config::default()
        };
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path), config);
    }

    #[test]
    fn normalized_swaps_inverted_ranges() {
        let config = Config {
            time_min: 200,
            time_max: 100,
            duck_volume: 3.0,
            ..Config::default()
        }
        .normalized();
        assert_eq!((config.time_min, config.time_max), (100, 200));
        assert_eq!(config.duck_volume, 1.0);
    }

    #[test]
    fn voice_name_defaults_without_library() {
        let config = Config::default();
        assert_eq!(config.voice_name(), "Default");
        assert!(config.noise_dir().is_none());
    }
}
