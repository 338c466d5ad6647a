//! Configuration module for the log mirror.
//!
//! This module provides environment-based configuration: the API endpoint,
//! output directory, poll interval, page size, rotation threshold and worker
//! pool size.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default endpoint of the log-aggregation API
const DEFAULT_API_URL: &str = "http://localhost:4566";

/// Default directory mirrored files are written to
const DEFAULT_OUTPUT_DIR: &str = ".";

/// Default seconds between poll ticks
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Minimum poll interval to avoid hammering the API
const MIN_POLL_INTERVAL_SECS: u64 = 1;

/// Maximum poll interval to keep mirrored files reasonably fresh
const MAX_POLL_INTERVAL_SECS: u64 = 3600;

/// Default maximum events requested per page
pub const DEFAULT_PAGE_LIMIT: usize = 1000;

/// Largest page the API accepts
const MAX_PAGE_LIMIT: usize = 10_000;

/// Default size past which a mirrored file is rotated (1 MiB)
pub const DEFAULT_ROTATION_BYTES: u64 = 1_048_576;

/// Smallest accepted rotation threshold
const MIN_ROTATION_BYTES: u64 = 1024;

/// Upper bound on the worker pool size
const MAX_WORKERS: usize = 256;

/// Configuration for the log mirror.
///
/// All settings can be configured via environment variables:
/// - `LOG_MIRROR_API_URL`: API endpoint (default: http://localhost:4566)
/// - `LOG_MIRROR_OUTPUT_DIR`: Directory for mirrored files (default: .)
/// - `LOG_MIRROR_POLL_INTERVAL_SECS`: Seconds between ticks (default: 30)
/// - `LOG_MIRROR_PAGE_LIMIT`: Events per page request (default: 1000)
/// - `LOG_MIRROR_ROTATION_BYTES`: Rotation threshold (default: 1048576)
/// - `LOG_MIRROR_WORKERS`: Concurrent poll tasks (default: available cores)
/// - `LOG_MIRROR_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 30)
/// - `LOG_MIRROR_MAX_RETRIES`: Max retry attempts (default: 3)
#[derive(Debug, Clone)]
pub struct Config {
    /// Endpoint every API action is posted to
    pub api_url: String,

    /// Directory the per-stream files are written to
    pub output_dir: PathBuf,

    /// Time between the starts of consecutive ticks
    pub poll_interval: Duration,

    /// Maximum events requested per page
    pub page_limit: usize,

    /// File size in bytes past which a mirrored file is rotated
    pub rotation_threshold: u64,

    /// Maximum number of poll tasks running at once
    pub workers: usize,

    /// HTTP request timeout duration
    pub request_timeout: Duration,

    /// Maximum number of retry attempts for failed requests
    pub max_retries: u32,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a bounded setting is not a valid number or
    /// falls outside its limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use log_mirror::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("API URL: {}", config.api_url);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("LOG_MIRROR_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = api_url.trim_end_matches('/').to_string();

        let output_dir = lookup("LOG_MIRROR_OUTPUT_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

        let poll_interval_secs = parse_bounded(
            &lookup,
            "LOG_MIRROR_POLL_INTERVAL_SECS",
            DEFAULT_POLL_INTERVAL_SECS,
            MIN_POLL_INTERVAL_SECS,
            MAX_POLL_INTERVAL_SECS,
        )?;

        let page_limit = parse_bounded(
            &lookup,
            "LOG_MIRROR_PAGE_LIMIT",
            DEFAULT_PAGE_LIMIT as u64,
            1,
            MAX_PAGE_LIMIT as u64,
        )? as usize;

        let rotation_threshold = parse_bounded(
            &lookup,
            "LOG_MIRROR_ROTATION_BYTES",
            DEFAULT_ROTATION_BYTES,
            MIN_ROTATION_BYTES,
            u64::MAX,
        )?;

        let workers = parse_bounded(
            &lookup,
            "LOG_MIRROR_WORKERS",
            default_workers() as u64,
            1,
            MAX_WORKERS as u64,
        )? as usize;

        // Lenient, like the retry knobs: fall back on garbage
        let request_timeout_secs: u64 = lookup("LOG_MIRROR_REQUEST_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let max_retries: u32 = lookup("LOG_MIRROR_MAX_RETRIES")
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        Ok(Self {
            api_url,
            output_dir,
            poll_interval: Duration::from_secs(poll_interval_secs),
            page_limit,
            rotation_threshold,
            workers,
            request_timeout: Duration::from_secs(request_timeout_secs),
            max_retries,
        })
    }
}

/// Parse an optional numeric variable and check it against `[min, max]`.
fn parse_bounded<F>(lookup: &F, env_var: &str, default: u64, min: u64, max: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(env_var) else {
        return Ok(default);
    };

    let parsed: u64 = value.trim().parse().map_err(|_| ConfigError {
        message: format!("'{}' is not a valid number", value),
        env_var: Some(env_var.to_string()),
    })?;

    if parsed < min {
        return Err(ConfigError {
            message: format!("{} is below minimum ({})", parsed, min),
            env_var: Some(env_var.to_string()),
        });
    }

    if parsed > max {
        return Err(ConfigError {
            message: format!("{} exceeds maximum ({})", parsed, max),
            env_var: Some(env_var.to_string()),
        });
    }

    Ok(parsed)
}

/// One worker per available core, as a process pool would size itself.
fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(MAX_WORKERS)
}

impl Default for Config {
    /// Create a default configuration using default values.
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            page_limit: DEFAULT_PAGE_LIMIT,
            rotation_threshold: DEFAULT_ROTATION_BYTES,
            workers: default_workers(),
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api_url, "http://localhost:4566");
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.page_limit, 1000);
        assert_eq!(config.rotation_threshold, 1_048_576);
        assert!(config.workers >= 1);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_config_with_no_variables_matches_defaults() {
        let config = load(&[]).expect("Should load with defaults");
        let defaults = Config::default();
        assert_eq!(config.api_url, defaults.api_url);
        assert_eq!(config.output_dir, defaults.output_dir);
        assert_eq!(config.poll_interval, defaults.poll_interval);
        assert_eq!(config.page_limit, defaults.page_limit);
        assert_eq!(config.workers, defaults.workers);
    }

    #[test]
    fn test_config_custom_values() {
        let config = load(&[
            ("LOG_MIRROR_API_URL", "http://logs.internal:9000/"),
            ("LOG_MIRROR_OUTPUT_DIR", "/var/log/mirror"),
            ("LOG_MIRROR_POLL_INTERVAL_SECS", "10"),
            ("LOG_MIRROR_PAGE_LIMIT", "500"),
            ("LOG_MIRROR_ROTATION_BYTES", "4096"),
            ("LOG_MIRROR_WORKERS", "8"),
            ("LOG_MIRROR_MAX_RETRIES", "5"),
        ])
        .expect("Should load custom values");

        assert_eq!(config.api_url, "http://logs.internal:9000"); // Trailing slash removed
        assert_eq!(config.output_dir, PathBuf::from("/var/log/mirror"));
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.page_limit, 500);
        assert_eq!(config.rotation_threshold, 4096);
        assert_eq!(config.workers, 8);
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn test_invalid_number() {
        let err = load(&[("LOG_MIRROR_PAGE_LIMIT", "lots")]).unwrap_err();
        assert!(err.message.contains("not a valid number"));
        assert_eq!(err.env_var.as_deref(), Some("LOG_MIRROR_PAGE_LIMIT"));
    }

    #[test]
    fn test_poll_interval_bounds() {
        let err = load(&[("LOG_MIRROR_POLL_INTERVAL_SECS", "0")]).unwrap_err();
        assert!(err.message.contains("below minimum"));

        let err = load(&[("LOG_MIRROR_POLL_INTERVAL_SECS", "99999")]).unwrap_err();
        assert!(err.message.contains("exceeds maximum"));
    }

    #[test]
    fn test_page_limit_and_workers_bounds() {
        assert!(load(&[("LOG_MIRROR_PAGE_LIMIT", "0")]).is_err());
        assert!(load(&[("LOG_MIRROR_PAGE_LIMIT", "10001")]).is_err());
        assert!(load(&[("LOG_MIRROR_WORKERS", "0")]).is_err());
        assert!(load(&[("LOG_MIRROR_WORKERS", "1000")]).is_err());
    }

    #[test]
    fn test_rotation_threshold_minimum() {
        let err = load(&[("LOG_MIRROR_ROTATION_BYTES", "10")]).unwrap_err();
        assert!(err.message.contains("below minimum"));
    }

    #[test]
    fn test_lenient_settings_fall_back() {
        let config = load(&[
            ("LOG_MIRROR_REQUEST_TIMEOUT_SECS", "soon"),
            ("LOG_MIRROR_MAX_RETRIES", "-1"),
        ])
        .unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError {
            message: "test error".to_string(),
            env_var: Some("TEST_VAR".to_string()),
        };
        assert_eq!(
            format!("{}", error),
            "Configuration error for TEST_VAR: test error"
        );

        let error_no_var = ConfigError {
            message: "general error".to_string(),
            env_var: None,
        };
        assert_eq!(
            format!("{}", error_no_var),
            "Configuration error: general error"
        );
    }
}
