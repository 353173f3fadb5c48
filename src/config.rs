//! Configuration for the logger.

use crate::source::SourceKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the logger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Period of the aggregator tick (one output row per tick)
    #[serde(with = "duration_ms")]
    pub tick_interval: Duration,

    /// Consecutive poll failures tolerated before a source is marked unavailable
    pub debounce_threshold: u32,

    /// Keep polling sources while the session is paused
    pub poll_while_paused: bool,

    /// Call `sync_data` after every row
    pub fsync: bool,

    /// Directory receiving `logger_*.csv` files
    pub log_dir: PathBuf,

    /// Path for storing cumulative statistics
    pub data_path: PathBuf,

    /// Whether a running headless logger should hold its session paused
    pub paused: bool,

    /// Per-source polling settings
    pub sources: SourcesConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("airlogger");

        Self {
            tick_interval: Duration::from_millis(500),
            debounce_threshold: 3,
            poll_while_paused: true,
            fsync: false,
            log_dir: data_dir.join("logs"),
            data_path: data_dir,
            paused: false,
            sources: SourcesConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file, falling back to defaults if absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
            let config: Config =
                serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("airlogger")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.log_dir).map_err(|e| ConfigError::Io(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }

    /// Check timing values that would stall or spin the loops.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid("tick_interval must be positive".to_string()));
        }
        for kind in SourceKind::ALL {
            let settings = self.sources.get(kind);
            if settings.interval.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "{kind} polling interval must be positive"
                )));
            }
            if settings.timeout.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "{kind} poll timeout must be positive"
                )));
            }
        }
        Ok(())
    }

    /// Replace every backend with the simulator.
    pub fn simulated(mut self) -> Self {
        self.sources.gps.backend = BackendConfig::Simulated;
        self.sources.environment.backend = BackendConfig::Simulated;
        self.sources.system.backend = BackendConfig::Simulated;
        self
    }
}

/// Polling settings for all three sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub gps: SourceSettings,
    pub environment: SourceSettings,
    pub system: SourceSettings,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            gps: SourceSettings {
                interval: Duration::from_millis(200),
                timeout: Duration::from_secs(3),
                backend: BackendConfig::Gpsd {
                    host: "127.0.0.1".to_string(),
                    port: 2947,
                    read_timeout_ms: 2000,
                },
            },
            environment: SourceSettings {
                interval: Duration::from_millis(500),
                timeout: Duration::from_secs(2),
                backend: BackendConfig::Command {
                    program: "sensehat-json".to_string(),
                    args: Vec::new(),
                },
            },
            system: SourceSettings {
                interval: Duration::from_millis(1000),
                timeout: Duration::from_secs(2),
                backend: BackendConfig::Vcgencmd {
                    program: "vcgencmd".to_string(),
                },
            },
        }
    }
}

impl SourcesConfig {
    pub fn get(&self, kind: SourceKind) -> &SourceSettings {
        match kind {
            SourceKind::Gps => &self.gps,
            SourceKind::Environment => &self.environment,
            SourceKind::System => &self.system,
        }
    }
}

/// Polling cadence and backend for one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Sleep between polls
    #[serde(with = "duration_ms")]
    pub interval: Duration,

    /// Longest a single poll may take before it counts as a failure
    #[serde(with = "duration_ms")]
    pub timeout: Duration,

    pub backend: BackendConfig,
}

/// Which driver backs a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// gpsd daemon over TCP
    Gpsd {
        host: String,
        port: u16,
        read_timeout_ms: u64,
    },
    /// Helper program printing one JSON object per run
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Raspberry Pi firmware tool
    Vcgencmd { program: String },
    /// Synthetic readings
    Simulated,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as integer milliseconds.
mod duration_ms {
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
        assert_eq!(config.tick_interval, Duration::from_millis(500));
        assert_eq!(config.debounce_threshold, 3);
        assert!(config.poll_while_paused);
        assert!(!config.paused);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"tick_interval": 250}"#).unwrap();
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.debounce_threshold, 3);
        assert_eq!(config.sources.system.interval, Duration::from_millis(1000));
    }

    #[test]
    fn test_backend_serialization() {
        let json = r#"{"type":"command","program":"read-env","args":["--json"]}"#;
        let backend: BackendConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            backend,
            BackendConfig::Command {
                program: "read-env".to_string(),
                args: vec!["--json".to_string()],
            }
        );

        let simulated = serde_json::to_string(&BackendConfig::Simulated).unwrap();
        assert_eq!(simulated, r#"{"type":"simulated"}"#);
    }

    #[test]
    fn test_zero_interval_is_invalid() {
        let mut config = Config::default();
        config.sources.gps.interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_round_trip_through_file() {
        let path = std::env::temp_dir()
            .join(format!("airlogger-config-{}", uuid::Uuid::new_v4()))
            .join("config.json");
        let config = Config::default().simulated();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.sources.gps.backend, BackendConfig::Simulated);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
