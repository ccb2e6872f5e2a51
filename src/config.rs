//! Configuration for the telemetry agent.

use crate::core::aggregate::DEFAULT_HEART_RATE;
use crate::core::schedule::{
    DEFAULT_AGGREGATION_PERIOD_MINS, DEFAULT_SLEEP_POLL_OFFSET_MINS,
    DEFAULT_SLEEP_POLL_PERIOD_MINS,
};
use crate::core::sleep::DEFAULT_STABILITY_THRESHOLD;
use crate::core::Schedule;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minutes per aggregation window
    pub aggregation_period_mins: u32,

    /// Minutes between sleep sensor polls
    pub sleep_poll_period_mins: u32,

    /// Offset of sleep polls within their period
    pub sleep_poll_offset_mins: u32,

    /// Consecutive unchanged polls before a sleep record is committed
    pub stability_threshold: u32,

    /// Heart rate recorded for windows without heart rate samples
    pub default_heart_rate: u32,

    /// IANA timezone used for wall-clock minutes and day boundaries
    pub timezone: String,

    /// Path for stores, stats and runtime state
    pub data_path: PathBuf,

    /// Whether sleep commits raise a notification
    pub notifications: bool,

    /// How often the display state file is checked
    #[serde(with = "duration_millis")]
    pub display_poll: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wearable-telemetry-agent");

        Self {
            aggregation_period_mins: DEFAULT_AGGREGATION_PERIOD_MINS,
            sleep_poll_period_mins: DEFAULT_SLEEP_POLL_PERIOD_MINS,
            sleep_poll_offset_mins: DEFAULT_SLEEP_POLL_OFFSET_MINS,
            stability_threshold: DEFAULT_STABILITY_THRESHOLD,
            default_heart_rate: DEFAULT_HEART_RATE,
            timezone: "UTC".to_string(),
            data_path: data_dir,
            notifications: true,
            display_poll: Duration::from_millis(250),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a file, defaulting when it does not exist.
    pub fn load_from(path: &PathBuf) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wearable-telemetry-agent")
            .join("config.json")
    }

    /// Check that the values describe a usable engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.aggregation_period_mins == 0 {
            return Err(ConfigError::Invalid(
                "aggregation_period_mins must be at least 1".to_string(),
            ));
        }
        if self.sleep_poll_period_mins == 0 {
            return Err(ConfigError::Invalid(
                "sleep_poll_period_mins must be at least 1".to_string(),
            ));
        }
        if self.sleep_poll_offset_mins >= self.sleep_poll_period_mins {
            return Err(ConfigError::Invalid(format!(
                "sleep_poll_offset_mins ({}) must be below sleep_poll_period_mins ({})",
                self.sleep_poll_offset_mins, self.sleep_poll_period_mins
            )));
        }
        if self.stability_threshold == 0 {
            return Err(ConfigError::Invalid(
                "stability_threshold must be at least 1".to_string(),
            ));
        }
        self.tz()?;
        Ok(())
    }

    /// Parsed timezone.
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Invalid(format!("unknown timezone '{}'", self.timezone)))
    }

    /// Directory holding the per-stream store files.
    pub fn store_path(&self) -> PathBuf {
        self.data_path.join("store")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    /// File holding the current display state ("on" / "off").
    pub fn display_state_path(&self) -> PathBuf {
        self.data_path.join("display_state")
    }

    /// File read by the file-backed sensor provider.
    pub fn sensors_path(&self) -> PathBuf {
        self.data_path.join("sensors.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(self.store_path())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Engine settings derived from this configuration.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            schedule: Schedule::new(
                self.aggregation_period_mins,
                self.sleep_poll_period_mins,
                self.sleep_poll_offset_mins,
            ),
            stability_threshold: self.stability_threshold,
            default_heart_rate: self.default_heart_rate,
            notifications: self.notifications,
        }
    }
}

/// The subset of configuration the engine itself needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub schedule: Schedule,
    pub stability_threshold: u32,
    pub default_heart_rate: u32,
    pub notifications: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Config::default().engine()
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for millisecond durations.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.aggregation_period_mins, 10);
        assert_eq!(config.sleep_poll_period_mins, 5);
        assert_eq!(config.stability_threshold, 6);
        assert_eq!(config.default_heart_rate, 80);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config {
            stability_threshold: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.stability_threshold = 6;
        config.sleep_poll_offset_mins = 5;
        assert!(config.validate().is_err());

        config.sleep_poll_offset_mins = 1;
        config.timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());

        config.timezone = "Asia/Seoul".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"stability_threshold": 3, "display_poll": 1000}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.stability_threshold, 3);
        assert_eq!(config.display_poll, Duration::from_millis(1000));
        assert_eq!(config.aggregation_period_mins, 10);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = Config {
            notifications: false,
            data_path: dir.path().to_path_buf(),
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
    }
}
