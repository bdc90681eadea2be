//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::{AppConfig, RuntimeMode};
use crate::config::validation::{validate_config, ValidationError};

/// Deployment mode override.
pub const ENV_MODE: &str = "APP_ENV";
/// Log directory override.
pub const ENV_LOG_DIR: &str = "LOG_DIR";
/// Log level override.
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
///
/// Environment overrides are applied once, here, and never consulted again.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    finish(config)
}

/// Build a configuration from defaults plus environment overrides.
pub fn load_default() -> Result<AppConfig, ConfigError> {
    finish(AppConfig::default())
}

fn finish(config: AppConfig) -> Result<AppConfig, ConfigError> {
    let config = apply_env_overrides(config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply overrides looked up through `lookup`.
pub fn apply_env_overrides<F>(mut config: AppConfig, lookup: F) -> AppConfig
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(mode) = lookup(ENV_MODE) {
        config.environment = RuntimeMode::from(mode);
    }
    if let Some(dir) = lookup(ENV_LOG_DIR).filter(|d| !d.is_empty()) {
        config.logging.directory = PathBuf::from(dir);
    }
    if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|l| !l.is_empty()) {
        config.logging.level = level;
    }
    config
}
