//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use checkout_saga::{CircuitBreakerConfig, RetryPolicy, SagaConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL for orders and stock; in-memory if unset
/// - `PAYMENT_SERVICE_URL`: payment service; in-memory approving double if unset
/// - `NOTIFICATION_SERVICE_URL`: notifier; in-memory recorder if unset
/// - `PAYMENT_TIMEOUT_MS` (2000), `PAYMENT_MAX_ATTEMPTS` (3), `SAGA_DEADLINE_MS` (10000)
/// - `NOTIFY_FAILURE_THRESHOLD` (5), `NOTIFY_COOLDOWN_MS` (30000)
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub payment_service_url: Option<String>,
    pub notification_service_url: Option<String>,
    pub payment_timeout: Duration,
    pub payment_max_attempts: u32,
    pub saga_deadline: Duration,
    pub notify_failure_threshold: u32,
    pub notify_cooldown: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(lookup("PORT"), defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref().map(str::trim) {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: non_empty("DATABASE_URL"),
            payment_service_url: non_empty("PAYMENT_SERVICE_URL"),
            notification_service_url: non_empty("NOTIFICATION_SERVICE_URL"),
            payment_timeout: parsed("PAYMENT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.payment_timeout),
            payment_max_attempts: parse_or(
                lookup("PAYMENT_MAX_ATTEMPTS"),
                defaults.payment_max_attempts,
            ),
            saga_deadline: parsed("SAGA_DEADLINE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.saga_deadline),
            notify_failure_threshold: parse_or(
                lookup("NOTIFY_FAILURE_THRESHOLD"),
                defaults.notify_failure_threshold,
            ),
            notify_cooldown: parsed("NOTIFY_COOLDOWN_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.notify_cooldown),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Saga tunables derived from this configuration.
    pub fn to_saga_config(&self) -> SagaConfig {
        SagaConfig {
            payment_timeout: self.payment_timeout,
            payment_retry: RetryPolicy::bounded(self.payment_max_attempts),
            deadline: self.saga_deadline,
            notification_breaker: CircuitBreakerConfig {
                failure_threshold: self.notify_failure_threshold.max(1),
                cooldown: self.notify_cooldown,
            },
            ..SagaConfig::default()
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            payment_service_url: None,
            notification_service_url: None,
            payment_timeout: Duration::from_millis(2000),
            payment_max_attempts: 3,
            saga_deadline: Duration::from_millis(10_000),
            notify_failure_threshold: 5,
            notify_cooldown: Duration::from_millis(30_000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config, Config::default());
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_values_from_environment() {
        let config = Config::from_lookup(lookup(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/market"),
            ("PAYMENT_SERVICE_URL", ""),
            ("PAYMENT_TIMEOUT_MS", "750"),
            ("PAYMENT_MAX_ATTEMPTS", "5"),
            ("NOTIFY_FAILURE_THRESHOLD", "2"),
        ]));

        assert_eq!(config.addr(), "127.0.0.1:8080");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/market"));
        assert!(config.payment_service_url.is_none());

        let saga = config.to_saga_config();
        assert_eq!(saga.payment_timeout, Duration::from_millis(750));
        assert_eq!(saga.payment_retry.max_attempts, Some(5));
        assert_eq!(saga.notification_breaker.failure_threshold, 2);
        assert_eq!(saga.deadline, Duration::from_secs(10));
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = Config::from_lookup(lookup(&[("PORT", "eighty"), ("SAGA_DEADLINE_MS", "-1")]));
        assert_eq!(config.port, 3000);
        assert_eq!(config.saga_deadline, Duration::from_secs(10));
    }
}
