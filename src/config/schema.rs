//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the firewall.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::relay::RelaySettings;
use crate::security::{ConnectionLimits, TokenBucketParams};

/// Root configuration for the database firewall.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FirewallConfig {
    /// Address to accept client connections on (e.g., "0.0.0.0:6432").
    pub local_address: String,

    /// Backend address connections are relayed to (e.g., "127.0.0.1:5432").
    pub remote_address: String,

    /// Maximum concurrent relayed connections.
    pub connection_limit: usize,

    /// Maximum concurrent relayed connections from a single source IP.
    pub per_ip_connection_limit: usize,

    /// Idle timeout in seconds (0 disables it).
    pub idle_timeout_secs: u64,

    /// Rate limiting configuration.
    pub rate_limiter: RateLimiterConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Shutdown behaviour.
    pub shutdown: ShutdownConfig,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            local_address: String::new(),
            remote_address: String::new(),
            connection_limit: 1024,
            per_ip_connection_limit: 64,
            idle_timeout_secs: 0,
            rate_limiter: RateLimiterConfig::default(),
            observability: ObservabilityConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl FirewallConfig {
    /// Connection ceilings for the register.
    pub fn limits(&self) -> ConnectionLimits {
        ConnectionLimits {
            global: self.connection_limit,
            per_ip: self.per_ip_connection_limit,
        }
    }

    /// Settings handed to every new relay session.
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            backend_address: self.remote_address.clone(),
            idle_timeout: self.idle_timeout(),
        }
    }

    pub fn token_bucket(&self) -> TokenBucketParams {
        TokenBucketParams::from(&self.rate_limiter.token_bucket_limiter)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub token_bucket_limiter: TokenBucketConfig,
}

/// Per-IP token bucket settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenBucketConfig {
    /// Tokens refilled per second (0 disables rate limiting).
    pub rate: u64,

    /// Burst capacity.
    pub capacity: u64,

    /// Upper bound on tracked source IPs (0 = unbounded).
    pub max_tracked_ips: usize,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            rate: 0,
            capacity: 0,
            max_tracked_ips: 100_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long in-flight sessions may keep running after shutdown starts
    /// before they are force-closed (0 = close immediately).
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 30,
        }
    }
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_document() {
        let config: FirewallConfig = toml::from_str(
            r#"
            local_address = "0.0.0.0:6432"
            remote_address = "127.0.0.1:5432"
            connection_limit = 200
            per_ip_connection_limit = 10
            idle_timeout_secs = 30

            [rate_limiter.token_bucket_limiter]
            rate = 5
            capacity = 20

            [observability]
            log_format = "json"

            [shutdown]
            drain_timeout_secs = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.limits(), ConnectionLimits { global: 200, per_ip: 10 });
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.token_bucket().rate, 5);
        assert_eq!(config.token_bucket().capacity, 20);
        assert_eq!(config.token_bucket().max_tracked_ips, 100_000);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.observability.log_level, "info");
        assert_eq!(config.shutdown.drain_timeout(), Duration::ZERO);

        let relay = config.relay_settings();
        assert_eq!(relay.backend_address, "127.0.0.1:5432");
    }

    #[test]
    fn zero_idle_timeout_disables_it() {
        let config = FirewallConfig::default();
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(config.relay_settings().idle_timeout, None);
    }
}
