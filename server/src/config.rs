//! Configuration management for the relay server.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Unparseable values fall back to the default for that key.

use availability_relay_core::AVAILABILITY_CHANNEL;
use availability_relay_runtime::{HubConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Redis configuration
    pub redis: RedisConfig,
    /// Broadcast hub configuration
    pub hub: HubSettings,
    /// Install the Prometheus recorder and serve `/metrics`
    pub metrics_enabled: bool,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
    /// Allow cross-origin requests from any origin
    pub allow_any_origin: bool,
}

/// Redis configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
}

/// Hub configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubSettings {
    /// Pub/sub channel carrying availability updates
    pub channel: String,
    /// Consecutive connection failures before giving up
    pub retry_max_attempts: u32,
    /// First reconnect delay in milliseconds
    pub retry_base_delay_ms: u64,
    /// Reconnect delay cap in milliseconds
    pub retry_max_delay_ms: u64,
    /// Uptime in seconds after which a lost connection starts a fresh
    /// failure sequence
    pub retry_stable_after_secs: u64,
    /// Per-subscriber queue capacity
    pub subscriber_buffer: usize,
}

impl Config {
    /// Load configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns the raw value for a key.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        macro_rules! parsed {
            ($key:expr) => {
                lookup($key).and_then(|s| s.trim().parse().ok())
            };
        }

        Self {
            server: ServerConfig {
                host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parsed!("PORT").unwrap_or(8080),
                shutdown_timeout: parsed!("SHUTDOWN_TIMEOUT").unwrap_or(10),
                allow_any_origin: parsed!("CORS_ALLOW_ANY_ORIGIN").unwrap_or(false),
            },
            redis: RedisConfig {
                url: lookup("REDIS_URL")
                    .unwrap_or_else(|| "redis://localhost:6379".to_string()),
                connect_timeout: parsed!("REDIS_CONNECT_TIMEOUT").unwrap_or(5),
            },
            hub: HubSettings {
                channel: lookup("AVAILABILITY_CHANNEL")
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| AVAILABILITY_CHANNEL.to_string()),
                retry_max_attempts: parsed!("RETRY_MAX_ATTEMPTS").unwrap_or(10),
                retry_base_delay_ms: parsed!("RETRY_BASE_DELAY_MS").unwrap_or(2000),
                retry_max_delay_ms: parsed!("RETRY_MAX_DELAY_MS").unwrap_or(60_000),
                retry_stable_after_secs: parsed!("RETRY_STABLE_AFTER_SECS").unwrap_or(30),
                subscriber_buffer: parsed!("SUBSCRIBER_BUFFER")
                    .filter(|n| *n > 0)
                    .unwrap_or(256),
            },
            metrics_enabled: parsed!("METRICS_ENABLED").unwrap_or(true),
        }
    }

    /// Address the HTTP server binds to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Graceful shutdown timeout.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout)
    }

    /// Redis connection timeout.
    #[must_use]
    pub const fn redis_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.redis.connect_timeout)
    }

    /// Hub configuration derived from these settings.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        let retry = RetryPolicy::builder()
            .max_attempts(self.hub.retry_max_attempts)
            .initial_delay(Duration::from_millis(self.hub.retry_base_delay_ms))
            .max_delay(Duration::from_millis(self.hub.retry_max_delay_ms))
            .stable_after(Duration::from_secs(self.hub.retry_stable_after_secs))
            .build();

        HubConfig::default()
            .with_channel(self.hub.channel.clone())
            .with_retry(retry)
            .with_subscriber_buffer(self.hub.subscriber_buffer)
            .with_shutdown_timeout(self.shutdown_timeout())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.redis.url, "redis://localhost:6379");
        assert_eq!(config.hub.channel, "events:availability");
        assert_eq!(config.hub.retry_max_attempts, 10);
        assert_eq!(config.hub.retry_base_delay_ms, 2000);
        assert_eq!(config.hub.retry_max_delay_ms, 60_000);
        assert_eq!(config.hub.retry_stable_after_secs, 30);
        assert_eq!(config.hub.subscriber_buffer, 256);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
        assert!(config.metrics_enabled);
        assert!(!config.server.allow_any_origin);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "9000"),
            ("REDIS_URL", "redis://cache:6380"),
            ("AVAILABILITY_CHANNEL", "staging:availability"),
            ("RETRY_MAX_ATTEMPTS", "3"),
            ("RETRY_BASE_DELAY_MS", "100"),
            ("SUBSCRIBER_BUFFER", "16"),
            ("METRICS_ENABLED", "false"),
            ("CORS_ALLOW_ANY_ORIGIN", "true"),
        ]);

        assert_eq!(config.bind_address(), "127.0.0.1:9000");
        assert_eq!(config.redis.url, "redis://cache:6380");
        assert_eq!(config.hub.channel, "staging:availability");
        assert_eq!(config.hub.retry_max_attempts, 3);
        assert_eq!(config.hub.subscriber_buffer, 16);
        assert!(!config.metrics_enabled);
        assert!(config.server.allow_any_origin);
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = config(&[
            ("PORT", "eighty"),
            ("RETRY_MAX_ATTEMPTS", "-1"),
            ("SUBSCRIBER_BUFFER", "0"),
            ("AVAILABILITY_CHANNEL", "  "),
        ]);

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.hub.retry_max_attempts, 10);
        assert_eq!(config.hub.subscriber_buffer, 256);
        assert_eq!(config.hub.channel, AVAILABILITY_CHANNEL);
    }

    #[test]
    fn test_hub_config_carries_retry_policy() {
        let config = config(&[
            ("RETRY_MAX_ATTEMPTS", "4"),
            ("RETRY_BASE_DELAY_MS", "500"),
            ("RETRY_MAX_DELAY_MS", "1500"),
            ("RETRY_STABLE_AFTER_SECS", "90"),
        ]);

        let hub = config.hub_config();

        assert_eq!(hub.channel, "events:availability");
        assert_eq!(hub.retry.max_attempts, 4);
        assert_eq!(hub.retry.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(hub.retry.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(hub.retry.delay_for_attempt(5), Duration::from_millis(1500));
        assert_eq!(hub.retry.stable_after, Duration::from_secs(90));
    }
}
