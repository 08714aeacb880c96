//! Application configuration loaded from environment variables.

use std::time::Duration;

use orchestrator::{ExecutorConfig, StallMonitorConfig};

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `text` or `json` (default: `text`)
/// - `DATABASE_URL` — PostgreSQL URL; unset selects the in-memory repository
/// - `DATABASE_MAX_CONNECTIONS` — pool size (default: `10`)
/// - `STALL_CHECK_INTERVAL_SECS` — stall monitor period (default: `60`)
/// - `STALL_THRESHOLD_SECS` — age after which a running operation is stalled (default: `1800`)
/// - `CANCEL_GRACE_SECS` — wait for a cancelled task before aborting it (default: `5`)
///
/// Unparseable values fall back to their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub stall_check_interval: Duration,
    pub stall_threshold: Duration,
    pub cancel_grace: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            database_max_connections: lookup("DATABASE_MAX_CONNECTIONS")
                .and_then(|n| n.parse().ok())
                .unwrap_or(defaults.database_max_connections),
            stall_check_interval: secs("STALL_CHECK_INTERVAL_SECS", defaults.stall_check_interval),
            stall_threshold: secs("STALL_THRESHOLD_SECS", defaults.stall_threshold),
            cancel_grace: secs("CANCEL_GRACE_SECS", defaults.cancel_grace),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig::new().with_cancel_grace(self.cancel_grace)
    }

    pub fn stall_monitor_config(&self) -> StallMonitorConfig {
        StallMonitorConfig::new()
            .with_interval(self.stall_check_interval)
            .with_threshold(self.stall_threshold)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 10,
            stall_check_interval: Duration::from_secs(60),
            stall_threshold: Duration::from_secs(30 * 60),
            cancel_grace: Duration::from_secs(5),
        }
    }
}
