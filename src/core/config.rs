//! Configuration for update-fetcher
//!
//! Layered as built-in defaults, then an optional config file (format picked
//! from the extension), then `UPDATE_FETCHER__*` environment variables, e.g.
//! `UPDATE_FETCHER__RETRY__MAX_ATTEMPTS=6`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "UPDATE_FETCHER";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration result type
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level fetcher configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetcherConfig {
    /// Directory holding staging and committed artifacts
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Upper bound on transfers running at once across all keys
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transfers: usize,

    /// Read buffer size for digest computation (bytes)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Minimum interval between progress callbacks
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

/// Retry/backoff settings for transient transfer failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles per attempt
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Cap on a single backoff delay
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Randomise each delay within [delay/2, delay]
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

/// HTTP client settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// A body read that stalls longer than this fails the attempt
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "update-fetcher")
        .map(|dirs| dirs.cache_dir().join("artifacts"))
        .unwrap_or_else(|| PathBuf::from("artifacts"))
}

fn default_max_concurrent() -> usize {
    2
}

fn default_buffer_size() -> usize {
    64 * 1024
}

fn default_progress_interval() -> u64 {
    100
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_jitter() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_idle_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("update-fetcher/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_concurrent_transfers: default_max_concurrent(),
            buffer_size: default_buffer_size(),
            progress_interval_ms: default_progress_interval(),
            retry: RetryConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl FetcherConfig {
    /// Defaults with a custom cache directory
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Default::default()
        }
    }

    /// Load defaults, then `path` (if any), then the environment
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: FetcherConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the coordinator cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent_transfers == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_transfers must be at least 1".to_string(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be non-zero".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.max_delay_ms ({}) is below retry.base_delay_ms ({})",
                self.retry.max_delay_ms, self.retry.base_delay_ms
            )));
        }
        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = FetcherConfig::default();
        assert_eq!(config.max_concurrent_transfers, 2);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.buffer_size, 64 * 1024);
        assert!(config.http.user_agent.starts_with("update-fetcher/"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = FetcherConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = FetcherConfig::default();
        config.max_concurrent_transfers = 0;
        assert!(config.validate().is_err());

        let mut config = FetcherConfig::default();
        config.retry.base_delay_ms = 10_000;
        config.retry.max_delay_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_json_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("fetcher.json");
        std::fs::write(
            &path,
            r#"{ "cache_dir": "/tmp/uf-cache", "retry": { "max_attempts": 7 } }"#,
        )
        .unwrap();

        let config = FetcherConfig::load(Some(&path)).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/uf-cache"));
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.http.idle_timeout_secs, 30);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("absent.toml");
        assert!(FetcherConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_serde_roundtrip_preserves_values() {
        let config = FetcherConfig::with_cache_dir("/var/cache/app");
        let json = serde_json::to_string(&config).unwrap();
        let back: FetcherConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
