//! Engine configuration.
//!
//! Loaded from a JSON file when present; every field has a default so an
//! empty or missing file yields a working configuration.

use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::curriculum::Curriculum;

/// Errors while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Values that parse but make no sense
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Sync engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Seconds between periodic smart syncs while online
    pub periodic_interval_secs: u64,

    /// Upper bound on the best-effort push at teardown
    pub exit_push_timeout_ms: u64,
}

impl SyncSettings {
    /// Periodic interval as a duration.
    pub fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_interval_secs)
    }

    /// Exit push budget as a duration.
    pub fn exit_push_timeout(&self) -> Duration {
        Duration::from_millis(self.exit_push_timeout_ms)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            periodic_interval_secs: 300, // 5 minutes
            exit_push_timeout_ms: 2_000,
        }
    }
}

/// Countdown persistence settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    /// Milliseconds per countdown tick (one second of countdown)
    pub tick_millis: u64,

    /// Ticks between autosave checks
    pub autosave_check_secs: u32,

    /// Minimum change in remaining seconds before an autosave write
    pub autosave_threshold_secs: u32,
}

impl TimerSettings {
    /// Tick period as a duration.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            tick_millis: 1_000,
            autosave_check_secs: 30,
            autosave_threshold_secs: 30,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Modules and their levels
    pub curriculum: Curriculum,

    /// Sync engine settings
    pub sync: SyncSettings,

    /// Countdown settings
    pub timer: TimerSettings,
}

impl EngineConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = match std::fs::read_to_string(path) {
            Ok(json) => serde_json::from_str(&json)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the curriculum.
    pub fn with_curriculum(mut self, curriculum: Curriculum) -> Self {
        self.curriculum = curriculum;
        self
    }

    /// Set the sync settings.
    pub fn with_sync(mut self, sync: SyncSettings) -> Self {
        self.sync = sync;
        self
    }

    /// Set the timer settings.
    pub fn with_timer(mut self, timer: TimerSettings) -> Self {
        self.timer = timer;
        self
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.curriculum.validate().map_err(ConfigError::Invalid)?;
        if self.sync.periodic_interval_secs == 0 {
            return Err(ConfigError::Invalid("sync.periodic_interval_secs must be > 0".into()));
        }
        if self.timer.tick_millis == 0 {
            return Err(ConfigError::Invalid("timer.tick_millis must be > 0".into()));
        }
        if self.timer.autosave_check_secs == 0 {
            return Err(ConfigError::Invalid("timer.autosave_check_secs must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(dir.path().join("config.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.sync.periodic_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"timer": {"autosave_threshold_secs": 10}}"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.timer.autosave_threshold_secs, 10);
        assert_eq!(config.timer.tick_millis, 1_000);
        assert_eq!(config.curriculum, Curriculum::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"sync": {"periodic_interval_secs": 0}}"#).unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(ConfigError::Invalid(_))));
    }
}
