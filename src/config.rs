//! Runtime configuration
//!
//! Values come from `LMSFETCH_*` environment variables with defaults; the CLI can
//! override them afterwards.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::cache::{CacheConfig, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_SIZE_BYTES};
use crate::client::{ClientConfig, DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES};

/// Environment variable holding the bearer token, read on every request
pub const TOKEN_VAR: &str = "LMSFETCH_TOKEN";

const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but does not parse
    #[error("Invalid value for {var}: '{value}'")]
    InvalidValue { var: String, value: String },

    /// Neither `LMSFETCH_CACHE_DIR` nor a platform cache directory is available
    #[error("No cache directory available; set LMSFETCH_CACHE_DIR")]
    NoCacheDir,
}

/// Everything needed to build the cache store and the network client
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub base_url: String,
    /// `None` means the platform default
    pub cache_dir: Option<PathBuf>,
    pub cache_max_bytes: u64,
    pub cache_max_entries: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub receive_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            cache_dir: None,
            cache_max_bytes: DEFAULT_MAX_SIZE_BYTES,
            cache_max_entries: DEFAULT_MAX_ENTRIES,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_BASE_DELAY,
            connect_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            send_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            receive_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl Config {
    /// Loads configuration from the process environment
    ///
    /// # Environment Variables
    /// - `LMSFETCH_BASE_URL` - proxy base address
    /// - `LMSFETCH_CACHE_DIR` - cache directory (default: platform cache dir)
    /// - `LMSFETCH_CACHE_MAX_BYTES` - byte budget (default: 50 MiB)
    /// - `LMSFETCH_CACHE_MAX_ENTRIES` - entry budget (default: 1000)
    /// - `LMSFETCH_MAX_RETRIES` - retries after the first attempt (default: 2)
    /// - `LMSFETCH_RETRY_DELAY_MS` - delay before the first retry (default: 2000)
    /// - `LMSFETCH_CONNECT_TIMEOUT_MS`, `LMSFETCH_SEND_TIMEOUT_MS`,
    ///   `LMSFETCH_RECEIVE_TIMEOUT_MS` - transport timeouts (default: 30000 each)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Loads configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            base_url: lookup("LMSFETCH_BASE_URL").unwrap_or(defaults.base_url),
            cache_dir: lookup("LMSFETCH_CACHE_DIR").map(PathBuf::from),
            cache_max_bytes: parse_var(&lookup, "LMSFETCH_CACHE_MAX_BYTES")?
                .unwrap_or(defaults.cache_max_bytes),
            cache_max_entries: parse_var(&lookup, "LMSFETCH_CACHE_MAX_ENTRIES")?
                .unwrap_or(defaults.cache_max_entries),
            max_retries: parse_var(&lookup, "LMSFETCH_MAX_RETRIES")?
                .unwrap_or(defaults.max_retries),
            retry_delay: millis_var(&lookup, "LMSFETCH_RETRY_DELAY_MS")?
                .unwrap_or(defaults.retry_delay),
            connect_timeout: millis_var(&lookup, "LMSFETCH_CONNECT_TIMEOUT_MS")?
                .unwrap_or(defaults.connect_timeout),
            send_timeout: millis_var(&lookup, "LMSFETCH_SEND_TIMEOUT_MS")?
                .unwrap_or(defaults.send_timeout),
            receive_timeout: millis_var(&lookup, "LMSFETCH_RECEIVE_TIMEOUT_MS")?
                .unwrap_or(defaults.receive_timeout),
        })
    }

    /// Cache settings, resolving the platform directory when none is configured
    pub fn cache_config(&self) -> Result<CacheConfig, ConfigError> {
        let dir = match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => CacheConfig::default_dir().ok_or(ConfigError::NoCacheDir)?,
        };
        Ok(CacheConfig::new(dir)
            .with_max_size_bytes(self.cache_max_bytes)
            .with_max_entries(self.cache_max_entries))
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.base_url.clone())
            .with_timeouts(self.connect_timeout, self.send_timeout, self.receive_timeout)
            .with_max_retries(self.max_retries)
            .with_base_delay(self.retry_delay)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                var: var.to_string(),
                value,
            }),
    }
}

fn millis_var(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(parse_var::<u64>(lookup, var)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| vars.get(var).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_delay, Duration::from_secs(2));
        assert_eq!(config.cache_max_entries, 1000);
        assert!(config.cache_dir.is_none());
    }

    #[test]
    fn test_from_lookup_without_vars_uses_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_lookup_reads_every_var() {
        let config = Config::from_lookup(lookup_from(&[
            ("LMSFETCH_BASE_URL", "https://proxy.example.edu/api"),
            ("LMSFETCH_CACHE_DIR", "/tmp/lmsfetch-test"),
            ("LMSFETCH_CACHE_MAX_BYTES", "1048576"),
            ("LMSFETCH_CACHE_MAX_ENTRIES", "50"),
            ("LMSFETCH_MAX_RETRIES", "5"),
            ("LMSFETCH_RETRY_DELAY_MS", "250"),
            ("LMSFETCH_CONNECT_TIMEOUT_MS", "1000"),
            ("LMSFETCH_SEND_TIMEOUT_MS", "2000"),
            ("LMSFETCH_RECEIVE_TIMEOUT_MS", " 3000 "),
        ]))
        .unwrap();

        assert_eq!(config.base_url, "https://proxy.example.edu/api");
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/lmsfetch-test")));
        assert_eq!(config.cache_max_bytes, 1_048_576);
        assert_eq!(config.cache_max_entries, 50);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.send_timeout, Duration::from_secs(2));
        assert_eq!(config.receive_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = Config::from_lookup(lookup_from(&[("LMSFETCH_MAX_RETRIES", "lots")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: "LMSFETCH_MAX_RETRIES".to_string(),
                value: "lots".to_string(),
            }
        );
        assert!(err.to_string().contains("LMSFETCH_MAX_RETRIES"));
    }

    #[test]
    fn test_derived_configs() {
        let config = Config {
            cache_dir: Some(PathBuf::from("/tmp/x")),
            cache_max_entries: 7,
            max_retries: 1,
            ..Config::default()
        };

        let cache = config.cache_config().unwrap();
        assert_eq!(cache.dir, PathBuf::from("/tmp/x"));
        assert_eq!(cache.max_entries, 7);

        let client = config.client_config();
        assert_eq!(client.base_url, config.base_url);
        assert_eq!(client.max_retries, 1);
        assert_eq!(client.base_delay, config.retry_delay);
    }
}
