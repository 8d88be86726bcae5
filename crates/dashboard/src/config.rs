//! Application configuration loaded from environment variables.

use std::time::Duration;

use live_refresh::{HistogramConfig, RefreshPolicy, RetryPolicy, SchedulerConfig};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `DATABASE_URL`: Postgres connection URI (default: unset, in-memory store)
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `8050`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `REFRESH_INTERVAL_SECS`: render cadence (default: `10`)
/// - `REFRESH_POLICY`: `always` or `on-change` (default: `always`)
/// - `LISTENER_MAX_RETRIES`: change feed re-subscription attempts (default: `5`)
/// - `AGE_BIN_WIDTH`: age histogram bucket width (default: `5`)
///
/// Unparseable values fall back to their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub refresh_interval: Duration,
    pub refresh_policy: RefreshPolicy,
    pub listener_max_retries: u32,
    pub age_bin_width: f64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            refresh_interval: lookup("REFRESH_INTERVAL_SECS")
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.refresh_interval),
            refresh_policy: lookup("REFRESH_POLICY")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.refresh_policy),
            listener_max_retries: lookup("LISTENER_MAX_RETRIES")
                .and_then(|n| n.parse().ok())
                .unwrap_or(defaults.listener_max_retries),
            age_bin_width: lookup("AGE_BIN_WIDTH")
                .and_then(|w| w.parse::<f64>().ok())
                .filter(|w| w.is_finite() && *w > 0.0)
                .unwrap_or(defaults.age_bin_width),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings for the refresh scheduler.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: self.refresh_interval,
            policy: self.refresh_policy,
            histogram: HistogramConfig::new(self.age_bin_width),
        }
    }

    /// Re-subscription policy for the change listener.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.listener_max_retries,
            ..RetryPolicy::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            host: "0.0.0.0".to_string(),
            port: 8050,
            log_level: "info".to_string(),
            refresh_interval: Duration::from_secs(10),
            refresh_policy: RefreshPolicy::Always,
            listener_max_retries: 5,
            age_bin_width: 5.0,
        }
    }
}
