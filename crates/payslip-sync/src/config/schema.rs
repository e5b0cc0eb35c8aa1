use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_relocation_attempts")]
    pub max_relocation_attempts: u32,
    #[serde(default = "default_watch_directory")]
    pub watch_directory: PathBuf,
    /// Defaults to `<watch_directory>/processed`.
    #[serde(default)]
    pub processed_directory: Option<PathBuf>,
    /// Defaults to `<watch_directory>/invalid`.
    #[serde(default)]
    pub invalid_directory: Option<PathBuf>,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_batch_size() -> usize {
    100
}

fn default_max_relocation_attempts() -> u32 {
    3
}

fn default_watch_directory() -> PathBuf {
    PathBuf::from("uploaded_payslips")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            max_relocation_attempts: default_max_relocation_attempts(),
            watch_directory: default_watch_directory(),
            processed_directory: None,
            invalid_directory: None,
            database_path: None,
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl ServiceConfig {
    /// A config rooted at `watch_directory` with every other value defaulted.
    pub fn for_directory<P: AsRef<Path>>(watch_directory: P) -> Self {
        Self {
            watch_directory: watch_directory.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        super::loader::load_from_env()
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        super::loader::load_from_lookup(lookup)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        super::loader::validate_config(self)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn processed_directory(&self) -> PathBuf {
        self.processed_directory
            .clone()
            .unwrap_or_else(|| self.watch_directory.join("processed"))
    }

    pub fn invalid_directory(&self) -> PathBuf {
        self.invalid_directory
            .clone()
            .unwrap_or_else(|| self.watch_directory.join("invalid"))
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert!(config.enabled);
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_relocation_attempts, 3);
        assert_eq!(
            config.processed_directory(),
            PathBuf::from("uploaded_payslips/processed")
        );
        assert_eq!(
            config.invalid_directory(),
            PathBuf::from("uploaded_payslips/invalid")
        );
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: ServiceConfig =
            serde_json::from_str(r#"{"watch_directory": "/srv/drop", "batch_size": 5}"#).unwrap();
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.processed_directory(), PathBuf::from("/srv/drop/processed"));
    }

    #[test]
    fn test_explicit_areas_override_defaults() {
        let mut config = ServiceConfig::for_directory("/srv/drop");
        config.invalid_directory = Some(PathBuf::from("/srv/rejected"));
        assert_eq!(config.invalid_directory(), PathBuf::from("/srv/rejected"));
        assert_eq!(config.processed_directory(), PathBuf::from("/srv/drop/processed"));
    }
}
