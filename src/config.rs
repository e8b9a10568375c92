use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::{Platform, StorageVariant};

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub query: QueryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the (already decrypted) chat data directory
    pub data_dir: String,
    pub platform: String,
    pub version: u32,
    /// Where point-in-time copies of locked shards are written; empty means system temp
    pub work_dir: String,
    pub copy_before_open: bool,
    pub watch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Delay between invalidating a shard handle and closing it
    pub close_grace_ms: u64,
    /// Poll interval for the watcher; 0 selects native notifications
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub default_limit: usize,
    pub max_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub format: String, // "json" or "text"
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                data_dir: String::new(),
                platform: Platform::current().to_string(),
                version: 3,
                work_dir: String::new(),
                copy_before_open: cfg!(windows),
                watch: true,
            },
            cache: CacheConfig {
                close_grace_ms: 5000,
                poll_interval_ms: 0,
            },
            query: QueryConfig {
                default_limit: 0,
                max_limit: 100_000,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
                format: "text".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            // Start with default values
            .add_source(Config::try_from(&Self::default())?)
            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("config").required(false))
            // Add environment variables with prefix
            .add_source(Environment::with_prefix("CHATLOG").separator("__"))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize configuration: {}", e))?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.variant()?;

        if self.cache.close_grace_ms > 600_000 {
            return Err(anyhow::anyhow!("close_grace_ms must be at most 600000"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            ));
        }

        if self.query.max_limit == 0 {
            return Err(anyhow::anyhow!("max_limit must be greater than 0"));
        }
        if self.query.default_limit > self.query.max_limit {
            return Err(anyhow::anyhow!(
                "default_limit ({}) exceeds max_limit ({})",
                self.query.default_limit,
                self.query.max_limit
            ));
        }

        Ok(())
    }

    /// Parsed platform
    pub fn platform(&self) -> Result<Platform> {
        Ok(self.storage.platform.parse()?)
    }

    /// Storage variant selected by platform and version
    pub fn variant(&self) -> Result<StorageVariant> {
        Ok(StorageVariant::select(self.platform()?, self.storage.version)?)
    }

    /// Data directory, overridable by `CHATLOG_DATA_DIR`
    pub fn data_dir(&self) -> PathBuf {
        std::env::var("CHATLOG_DATA_DIR")
            .map_or_else(|_| PathBuf::from(&self.storage.data_dir), PathBuf::from)
    }

    /// Directory for temporary shard copies
    pub fn work_dir(&self) -> PathBuf {
        if self.storage.work_dir.is_empty() {
            std::env::temp_dir().join("chatlog")
        } else {
            PathBuf::from(&self.storage.work_dir)
        }
    }

    /// Get log level from environment or config
    pub fn get_log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.cache.close_grace_ms, 5000);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.storage.version, 3);
    }

    #[test]
    fn test_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = AppConfig::default();
        config.storage.version = 2;
        assert!(config.validate().is_err());
    }
}
