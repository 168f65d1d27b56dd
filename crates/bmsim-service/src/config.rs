//! Service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use bmsim_core::{DEFAULT_MAX_FRAME_BYTES, DEFAULT_PORT, EngineConfig};

use crate::server::ServerOptions;

/// Service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Simulated device settings.
    pub device: DeviceConfig,
    /// Server settings.
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// A missing file is not an error: the defaults are returned.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration, collecting every problem.
    ///
    /// # Example
    ///
    /// ```
    /// use bmsim_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = self.device.validate();
        errors.extend(self.server.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Simulated device settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device identifier reported to clients.
    pub device_id: String,
    /// Free-form location reported to clients.
    pub location: String,
    /// Milliseconds between update cycles.
    pub update_interval_ms: u64,
    /// RNG seed. Omit for a different run every time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Clamp out-of-range overrides instead of rejecting them.
    pub clamp_overrides: bool,
}

/// Shortest accepted update interval.
pub const MIN_UPDATE_INTERVAL_MS: u64 = 10;
/// Longest accepted update interval (1 hour).
pub const MAX_UPDATE_INTERVAL_MS: u64 = 3_600_000;

impl Default for DeviceConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            device_id: engine.device_id,
            location: engine.location,
            update_interval_ms: 1000,
            seed: None,
            clamp_overrides: engine.clamp_overrides,
        }
    }
}

impl DeviceConfig {
    /// Validate device settings.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.device_id.trim().is_empty() {
            errors.push(ValidationError {
                field: "device.device_id".to_string(),
                message: "device id cannot be empty".to_string(),
            });
        }

        if self.update_interval_ms < MIN_UPDATE_INTERVAL_MS {
            errors.push(ValidationError {
                field: "device.update_interval_ms".to_string(),
                message: format!(
                    "update interval {} ms is too short (minimum {} ms)",
                    self.update_interval_ms, MIN_UPDATE_INTERVAL_MS
                ),
            });
        } else if self.update_interval_ms > MAX_UPDATE_INTERVAL_MS {
            errors.push(ValidationError {
                field: "device.update_interval_ms".to_string(),
                message: format!(
                    "update interval {} ms is too long (maximum {} ms / 1 hour)",
                    self.update_interval_ms, MAX_UPDATE_INTERVAL_MS
                ),
            });
        }

        errors
    }

    /// Time between update cycles.
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    /// Engine settings for this device.
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default()
            .device_id(self.device_id.clone())
            .location(self.location.clone())
            .clamp_overrides(self.clamp_overrides);
        if let Some(seed) = self.seed {
            config = config.seed(seed);
        }
        config
    }
}

/// Server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host or address to bind.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Longest accepted request line in bytes.
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ServerConfig {
    /// Validate server settings.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.host.trim().is_empty() {
            errors.push(ValidationError {
                field: "server.host".to_string(),
                message: "host cannot be empty".to_string(),
            });
        }
        if self.port == 0 {
            errors.push(ValidationError {
                field: "server.port".to_string(),
                message: "port cannot be 0".to_string(),
            });
        }
        // Must at least fit a read_all request.
        if self.max_frame_bytes < 64 {
            errors.push(ValidationError {
                field: "server.max_frame_bytes".to_string(),
                message: format!(
                    "frame limit {} is too small (minimum 64 bytes)",
                    self.max_frame_bytes
                ),
            });
        }

        errors
    }

    /// Listener options for these settings.
    pub fn options(&self) -> ServerOptions {
        ServerOptions::default().max_frame_bytes(self.max_frame_bytes)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `server.port`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bmsim")
        .join("server.toml")
}
