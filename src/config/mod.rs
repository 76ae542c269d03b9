use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::TrackDescriptor;
use crate::player::finder::{DetectorConfig, LoopDetector};

/// Settings the player consults at runtime: volume, shuffle behavior, and
/// loop-detection tuning.
pub trait SettingsProvider {
    /// Push the current detection knobs into `detector`, reporting whether
    /// anything changed since it was last configured.
    fn customize_detector(&self, detector: &mut dyn LoopDetector) -> bool;

    /// Maximum track-history length; `None` or zero disables history.
    fn shuffle_history_length(&self) -> Option<usize>;

    /// Fade-out length in seconds before an automatic track change.
    fn fade_duration(&self) -> Option<f64>;

    /// How long `track` should play before shuffling away, in seconds.
    fn calculate_shuffle_time(&self, track: &TrackDescriptor) -> Option<f64>;

    /// Global volume in [0, 1], applied on top of per-track multipliers.
    fn master_volume(&self) -> f64;
}

/// Player settings, persisted as TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSettings {
    pub master_volume: f64,
    pub shuffle_history_length: Option<usize>,
    /// Shuffle after a fixed number of minutes.
    pub shuffle_time_minutes: Option<f64>,
    /// Shuffle after this many passes through the loop region. Only
    /// consulted when no fixed time is set.
    pub shuffle_repeats: Option<f64>,
    pub fade_duration_seconds: Option<f64>,
    pub detector: DetectorSettings,
}

/// Loop-detection knobs as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorSettings {
    pub min_loop_duration: f64,
    pub min_confidence: f64,
    pub mono_analysis: bool,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            master_volume: 1.0,
            shuffle_history_length: Some(50),
            shuffle_time_minutes: None,
            shuffle_repeats: Some(3.0),
            fade_duration_seconds: Some(2.0),
            detector: DetectorSettings::default(),
        }
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        let defaults = DetectorConfig::default();
        Self {
            min_loop_duration: defaults.min_loop_duration,
            min_confidence: defaults.min_confidence,
            mono_analysis: defaults.mono_analysis,
        }
    }
}

impl SettingsProvider for PlayerSettings {
    fn customize_detector(&self, detector: &mut dyn LoopDetector) -> bool {
        detector.apply_config(&DetectorConfig {
            min_loop_duration: self.detector.min_loop_duration,
            min_confidence: self.detector.min_confidence,
            mono_analysis: self.detector.mono_analysis,
        })
    }

    fn shuffle_history_length(&self) -> Option<usize> {
        self.shuffle_history_length
    }

    fn fade_duration(&self) -> Option<f64> {
        self.fade_duration_seconds
    }

    fn calculate_shuffle_time(&self, track: &TrackDescriptor) -> Option<f64> {
        if let Some(minutes) = self.shuffle_time_minutes {
            return Some(minutes * 60.0);
        }
        let repeats = self.shuffle_repeats?;
        let loop_length = track.loop_end - track.loop_start;
        if loop_length > 0.0 {
            Some(repeats * loop_length)
        } else {
            None
        }
    }

    fn master_volume(&self) -> f64 {
        self.master_volume
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    settings: PlayerSettings,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        let settings = Self::load_settings(&config_path).unwrap_or_default();

        Ok(Self {
            settings,
            config_path,
        })
    }

    /// Manager rooted at an explicit file, used by tests.
    pub fn with_path(config_path: PathBuf) -> Result<Self, ConfigError> {
        let settings = Self::load_settings(&config_path)?;
        Ok(Self {
            settings,
            config_path,
        })
    }

    pub fn settings(&self) -> &PlayerSettings {
        &self.settings
    }

    pub fn update_settings<F>(&mut self, updater: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut PlayerSettings),
    {
        updater(&mut self.settings);
        self.save_settings()
    }

    pub fn set_master_volume(&mut self, volume: f64) -> Result<(), ConfigError> {
        self.settings.master_volume = volume.clamp(0.0, 1.0);
        self.save_settings()
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.settings = PlayerSettings::default();
        self.save_settings()
    }

    fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::home_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join(".config")
            .join("loop-music-player");

        std::fs::create_dir_all(&config_dir).map_err(ConfigError::IoError)?;

        Ok(config_dir.join("config.toml"))
    }

    fn load_settings(path: &Path) -> Result<PlayerSettings, ConfigError> {
        if !path.exists() {
            return Ok(PlayerSettings::default());
        }

        let content = std::fs::read_to_string(path).map_err(ConfigError::IoError)?;
        let settings: PlayerSettings =
            toml::from_str(&content).map_err(ConfigError::DeserializationError)?;

        Ok(settings)
    }

    fn save_settings(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
        }

        let content =
            toml::to_string_pretty(&self.settings).map_err(ConfigError::SerializationError)?;

        std::fs::write(&self.config_path, content).map_err(ConfigError::IoError)?;

        Ok(())
    }
}
