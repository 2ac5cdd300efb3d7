//! Bridge configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sleepsync_link::{LinkConfig, ReconnectOptions};

/// Bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Serial link settings.
    pub link: LinkSection,
}

impl Config {
    /// Load configuration from the default path (`sleepsync.toml` in the
    /// working directory), falling back to defaults when it is absent.
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

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - Bind addresses are valid (host:port format)
    /// - The HTTP and WebSocket listeners do not share an address
    /// - Baud rate and buffer sizes are non-zero
    /// - Reconnect delay is within reasonable bounds (1s - 5 minutes)
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.link.validate());

        if !self.server.http_bind.is_empty() && self.server.http_bind == self.server.ws_bind {
            errors.push(ValidationError {
                field: "server.ws_bind".to_string(),
                message: "WebSocket listener cannot share the HTTP bind address".to_string(),
            });
        }

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

/// Default configuration path.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("sleepsync.toml")
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP API bind address.
    pub http_bind: String,
    /// Dedicated WebSocket bind address.
    pub ws_bind: String,
    /// Broadcast buffer for WebSocket fan-out.
    pub broadcast_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_bind: "127.0.0.1:3001".to_string(),
            ws_bind: "127.0.0.1:3002".to_string(),
            broadcast_buffer: 100,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for (field, bind) in [("server.http_bind", &self.http_bind), ("server.ws_bind", &self.ws_bind)] {
            if bind.is_empty() {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: "bind address cannot be empty".to_string(),
                });
            } else if bind.parse::<std::net::SocketAddr>().is_err() {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: format!("invalid bind address '{}'", bind),
                });
            }
        }

        if self.broadcast_buffer == 0 {
            errors.push(ValidationError {
                field: "server.broadcast_buffer".to_string(),
                message: "broadcast buffer must be at least 1".to_string(),
            });
        }

        errors
    }
}

/// Serial link configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSection {
    /// Explicit serial port path; auto-detect when unset.
    pub port: Option<String>,
    /// Serial baud rate.
    pub baud: u32,
    /// Fall back to the first enumerated port when detection finds no match.
    pub fallback_to_first_port: bool,
    /// Delay between reconnect attempts, in seconds.
    pub reconnect_delay_secs: u64,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            port: None,
            baud: sleepsync_link::DEFAULT_BAUD,
            fallback_to_first_port: true,
            reconnect_delay_secs: 3,
        }
    }
}

impl LinkSection {
    /// Validate link configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.baud == 0 {
            errors.push(ValidationError {
                field: "link.baud".to_string(),
                message: "baud rate must be non-zero".to_string(),
            });
        }

        if self.reconnect_delay_secs == 0 || self.reconnect_delay_secs > 300 {
            errors.push(ValidationError {
                field: "link.reconnect_delay_secs".to_string(),
                message: "reconnect delay must be between 1 and 300 seconds".to_string(),
            });
        }

        if let Some(port) = &self.port {
            if port.is_empty() {
                errors.push(ValidationError {
                    field: "link.port".to_string(),
                    message: "port path cannot be empty (omit to auto-detect)".to_string(),
                });
            }
        }

        errors
    }

    /// Build the supervisor configuration for this section.
    pub fn to_link_config(&self) -> LinkConfig {
        LinkConfig {
            port: self.port.clone(),
            baud: self.baud,
            fallback_to_first_port: self.fallback_to_first_port,
            reconnect: ReconnectOptions::new()
                .initial_delay(Duration::from_secs(self.reconnect_delay_secs)),
            ..LinkConfig::default()
        }
    }
}

/// A single validation failure.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse the config file.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Failed to write the config file.
    #[error("failed to write config to {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize the config.
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    /// The config is structurally valid but semantically wrong.
    #[error("invalid configuration: {}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
