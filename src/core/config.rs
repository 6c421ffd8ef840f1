//! Application configuration management
//!
//! Settings are layered: built-in defaults, then the JSON file in the
//! project config directory, then `HLS_ARCHIVER__SECTION__KEY` environment
//! variables.

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::archive::CollisionPolicy;
use crate::core::error_handling::RetryPolicy;
use crate::utils::network::get_user_agent;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "HLS_ARCHIVER";

/// Main application configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub download: DownloadConfig,
    pub reporter: ReporterConfig,
    pub archive: ArchiveConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Segment download settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Segments fetched concurrently per batch
    pub batch_size: usize,
    /// Retries after the first attempt of a segment
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Per-attempt timeout
    pub request_timeout_seconds: u64,
    pub user_agent: String,
    pub headers: HashMap<String, String>,
    /// How long a finished download stays queryable
    pub result_retention_seconds: u64,
    pub speed_window_ms: u64,
}

/// Progress event settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    pub min_emit_interval_ms: u64,
    pub channel_capacity: usize,
}

/// Archive output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub extension: String,
    pub collision_policy: CollisionPolicy,
    pub compress_segments: bool,
    pub compression_level: Option<i32>,
}

/// Manifest persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub persist: bool,
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String, // "error", "warn", "info", "debug", "trace"
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 5_000,
            request_timeout_seconds: 30,
            user_agent: get_user_agent().to_string(),
            headers: HashMap::new(),
            result_retention_seconds: 300,
            speed_window_ms: 3_000,
        }
    }
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            min_emit_interval_ms: 250,
            channel_capacity: 256,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            extension: "zip".to_string(),
            collision_policy: CollisionPolicy::Disambiguate,
            compress_segments: false,
            compression_level: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            persist: true,
            data_dir: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl DownloadConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn result_retention(&self) -> Duration {
        Duration::from_secs(self.result_retention_seconds)
    }

    pub fn speed_window(&self) -> Duration {
        Duration::from_millis(self.speed_window_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            ..Default::default()
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path plus environment overrides
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from `path` (optional) plus environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration: {:?}", path))?;

        let config: AppConfig = settings
            .try_deserialize()
            .with_context(|| "Failed to parse configuration")?;
        config.validate()?;

        tracing::debug!("Loaded configuration (file: {:?})", path);
        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content =
            serde_json::to_string_pretty(self).with_context(|| "Failed to serialize config")?;

        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        tracing::info!("Saved configuration to: {:?}", config_path);
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn get_config_path() -> Result<PathBuf> {
        let project_dirs = Self::project_dirs()?;
        Ok(project_dirs.config_dir().join("config.json"))
    }

    /// Get the application data directory
    pub fn get_data_dir() -> Result<PathBuf> {
        let project_dirs = Self::project_dirs()?;
        Ok(project_dirs.data_dir().to_path_buf())
    }

    /// Directory holding persisted manifest sets
    pub fn manifest_dir(&self) -> Result<PathBuf> {
        match self.storage.data_dir {
            Some(ref dir) => Ok(dir.join("manifests")),
            None => Ok(Self::get_data_dir()?.join("manifests")),
        }
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "hlsarchiver", "hls-archiver")
            .with_context(|| "Failed to get project directories")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.download.batch_size == 0 {
            bail!("download.batch_size must be at least 1");
        }
        if self.download.request_timeout_seconds == 0 {
            bail!("download.request_timeout_seconds must be greater than 0");
        }
        if self.download.retry_max_delay_ms < self.download.retry_base_delay_ms {
            bail!("download.retry_max_delay_ms must not be below retry_base_delay_ms");
        }
        if self.reporter.channel_capacity == 0 {
            bail!("reporter.channel_capacity must be at least 1");
        }
        if self.archive.extension.trim().is_empty() {
            bail!("archive.extension must not be empty");
        }
        if let Some(level) = self.archive.compression_level {
            if !(0..=9).contains(&level) {
                bail!("archive.compression_level must be between 0 and 9");
            }
        }

        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            bail!("Invalid log level: {}", self.logging.level);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.download.batch_size, 5);
        assert_eq!(config.archive.collision_policy, CollisionPolicy::Disambiguate);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.download.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.archive.compression_level = Some(12);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"download":{"batch_size":8},"archive":{"collision_policy":"first_write"}}"#,
        )
        .unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.download.batch_size, 8);
        assert_eq!(loaded.download.retry_attempts, 3);
        assert_eq!(loaded.archive.collision_policy, CollisionPolicy::FirstWrite);

        let saved_path = dir.path().join("nested").join("config.json");
        loaded.save_to(&saved_path).unwrap();
        let reloaded = AppConfig::load_from(&saved_path).unwrap();
        assert_eq!(reloaded.download.batch_size, 8);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let loaded = AppConfig::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded.reporter.min_emit_interval_ms, 250);
    }

    #[test]
    fn test_retry_policy_from_download_config() {
        let config = DownloadConfig::default();
        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }
}
