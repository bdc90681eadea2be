//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Root configuration for the service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Deployment mode. Gates stack traces in error bodies and the console log.
    pub environment: RuntimeMode,

    /// Listener configuration.
    pub server: ServerConfig,

    /// Log destinations.
    pub logging: LoggingConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request hardening.
    pub security: SecurityConfig,
}

/// Deployment mode of the running process.
///
/// Anything that is not `production` is treated as development, so a typo in
/// the environment name errs on the side of showing diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RuntimeMode {
    Production,
    #[default]
    Development,
}

impl RuntimeMode {
    pub fn is_production(self) -> bool {
        self == RuntimeMode::Production
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeMode::Production => "production",
            RuntimeMode::Development => "development",
        }
    }
}

impl FromStr for RuntimeMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

impl From<String> for RuntimeMode {
    fn from(value: String) -> Self {
        if value == "production" {
            RuntimeMode::Production
        } else {
            RuntimeMode::Development
        }
    }
}

impl From<RuntimeMode> for String {
    fn from(mode: RuntimeMode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Log file and console settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory holding `error.log` and `combined.log`. Created on startup.
    pub directory: PathBuf,

    /// Minimum level for the combined file and the console (trace, debug, info, warn, error).
    pub level: String,

    /// Force the console destination on or off. Unset means "on outside production".
    pub console: Option<bool>,

    /// File rotation policy.
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            level: "info".to_string(),
            console: None,
            rotation: LogRotation::Never,
        }
    }
}

impl LoggingConfig {
    /// Whether the console destination is attached in the given mode.
    pub fn console_enabled(&self, mode: RuntimeMode) -> bool {
        self.console.unwrap_or(!mode.is_production())
    }
}

/// How log files roll over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// Single append-only file per destination.
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}
