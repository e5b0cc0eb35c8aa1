use std::path::PathBuf;
use std::str::FromStr;

use crate::config::schema::{LogFormat, ServiceConfig};
use crate::error::ConfigError;

/// Builds the service configuration from the process environment.
pub fn load_from_env() -> Result<ServiceConfig, ConfigError> {
    load_from_lookup(|name| std::env::var(name).ok())
}

/// Builds the service configuration from an arbitrary variable lookup.
/// Unset variables keep their defaults.
pub fn load_from_lookup<F>(lookup: F) -> Result<ServiceConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ServiceConfig::default();
    let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(value) = get("AUTO_START") {
        config.enabled = parse_bool("AUTO_START", &value)?;
    }
    if let Some(value) = get("POLL_INTERVAL_SECS") {
        config.poll_interval_secs = parse_number("POLL_INTERVAL_SECS", &value)?;
    }
    if let Some(value) = get("BATCH_SIZE") {
        config.batch_size = parse_number("BATCH_SIZE", &value)?;
    }
    if let Some(value) = get("MAX_RELOCATION_ATTEMPTS") {
        config.max_relocation_attempts = parse_number("MAX_RELOCATION_ATTEMPTS", &value)?;
    }
    if let Some(value) = get("WATCH_DIR") {
        config.watch_directory = PathBuf::from(value);
    }
    config.processed_directory = get("PROCESSED_DIR").map(PathBuf::from);
    config.invalid_directory = get("INVALID_DIR").map(PathBuf::from);
    config.database_path = get("DATABASE_PATH").map(PathBuf::from);
    if let Some(value) = get("LOG_LEVEL") {
        config.log_level = value.to_lowercase();
    }
    if let Some(value) = get("LOG_FORMAT") {
        config.log_format = match value.to_lowercase().as_str() {
            "text" | "pretty" => LogFormat::Text,
            "json" => LogFormat::Json,
            _ => {
                return Err(ConfigError::InvalidValue {
                    name: "LOG_FORMAT".to_string(),
                    value,
                    reason: "expected text or json".to_string(),
                })
            }
        };
    }

    validate_config(&config)?;
    Ok(config)
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

fn parse_number<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

pub fn validate_config(config: &ServiceConfig) -> Result<(), ConfigError> {
    if config.poll_interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "poll interval must be at least one second".to_string(),
        });
    }
    if config.batch_size == 0 {
        return Err(ConfigError::Validation {
            message: "batch size must be at least 1".to_string(),
        });
    }
    if config.max_relocation_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "max relocation attempts must be at least 1".to_string(),
        });
    }

    let processed = config.processed_directory();
    let invalid = config.invalid_directory();
    if processed == config.watch_directory || invalid == config.watch_directory {
        return Err(ConfigError::Validation {
            message: format!(
                "processed and invalid areas must differ from the watched directory '{}'",
                config.watch_directory.display()
            ),
        });
    }
    if processed == invalid {
        return Err(ConfigError::Validation {
            message: format!(
                "processed and invalid areas must differ (both '{}')",
                processed.display()
            ),
        });
    }

    Ok(())
}
