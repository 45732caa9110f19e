use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Rate correction applied to media tracks that drift from the master clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Drift below this many seconds plays at normal rate.
    pub tolerance: f64,
    /// Drift at which the correction rate saturates.
    pub max_drift: f64,
    pub max_rate: f64,
    /// Relative rate change required before a new rate is applied.
    pub hysteresis: f64,
    /// Hard seek when the track lags by more than this.
    pub far_behind: f64,
    /// Hard seek when the track leads by more than this.
    pub far_ahead: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.05,
            max_drift: 3.0,
            max_rate: 3.0,
            hysteresis: 0.03,
            far_behind: 1.0,
            far_ahead: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub tick_interval_ms: u64,
    /// `play()` restarts from zero when this close to the end.
    pub rewind_threshold: f64,
    pub drift: DriftConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            rewind_threshold: 1.0,
            drift: DriftConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config =
            RuntimeConfig::from_json_str(r#"{"tick_interval_ms": 40, "drift": {"far_ahead": 0.2}}"#)
                .unwrap();
        assert_eq!(config.tick_interval(), Duration::from_millis(40));
        assert_eq!(config.rewind_threshold, 1.0);
        assert_eq!(config.drift.far_ahead, 0.2);
        assert_eq!(config.drift.hysteresis, 0.03);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            RuntimeConfig::from_json_str("{"),
            Err(ConfigError::Json(_))
        ));
    }
}
