//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check addresses are set, resolvable and distinct
//! - Validate limit ranges and their relationship
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: FirewallConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

use crate::config::schema::FirewallConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is empty.
    Missing(&'static str),
    /// An address could not be parsed or resolved.
    InvalidAddress { field: &'static str, reason: String },
    /// Client and backend addresses are the same.
    SameAddress,
    /// A limit must be strictly positive.
    NonPositive(&'static str),
    /// The per-IP limit is larger than the global one.
    PerIpExceedsGlobal { per_ip: usize, global: usize },
    /// Rate limiting is enabled with an empty bucket.
    ZeroCapacity,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Missing(field) => write!(f, "{} must be set", field),
            ValidationError::InvalidAddress { field, reason } => {
                write!(f, "invalid {}: {}", field, reason)
            }
            ValidationError::SameAddress => {
                write!(f, "local_address and remote_address must not be the same")
            }
            ValidationError::NonPositive(field) => write!(f, "{} must be > 0", field),
            ValidationError::PerIpExceedsGlobal { per_ip, global } => write!(
                f,
                "per_ip_connection_limit ({}) cannot exceed connection_limit ({})",
                per_ip, global
            ),
            ValidationError::ZeroCapacity => write!(
                f,
                "rate_limiter.token_bucket_limiter.capacity must be > 0 when rate is set"
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &FirewallConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "local_address", &config.local_address);
    check_address(&mut errors, "remote_address", &config.remote_address);
    if !config.local_address.is_empty() && config.local_address == config.remote_address {
        errors.push(ValidationError::SameAddress);
    }

    if config.connection_limit == 0 {
        errors.push(ValidationError::NonPositive("connection_limit"));
    }
    if config.per_ip_connection_limit == 0 {
        errors.push(ValidationError::NonPositive("per_ip_connection_limit"));
    }
    if config.per_ip_connection_limit > config.connection_limit {
        errors.push(ValidationError::PerIpExceedsGlobal {
            per_ip: config.per_ip_connection_limit,
            global: config.connection_limit,
        });
    }

    let bucket = &config.rate_limiter.token_bucket_limiter;
    if bucket.rate > 0 && bucket.capacity == 0 {
        errors.push(ValidationError::ZeroCapacity);
    }

    if config.observability.metrics_enabled {
        if let Err(e) = config.observability.metrics_address.parse::<SocketAddr>() {
            errors.push(ValidationError::InvalidAddress {
                field: "observability.metrics_address",
                reason: e.to_string(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.is_empty() {
        errors.push(ValidationError::Missing(field));
        return;
    }

    match value.to_socket_addrs() {
        Ok(mut addrs) => {
            if addrs.next().is_none() {
                errors.push(ValidationError::InvalidAddress {
                    field,
                    reason: "resolved to no addresses".to_string(),
                });
            }
        }
        Err(e) => errors.push(ValidationError::InvalidAddress {
            field,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> FirewallConfig {
        FirewallConfig {
            local_address: "127.0.0.1:6432".to_string(),
            remote_address: "127.0.0.1:5432".to_string(),
            connection_limit: 10,
            per_ip_connection_limit: 2,
            ..FirewallConfig::default()
        }
    }

    #[test]
    fn accepts_valid_config() {
        assert_eq!(validate_config(&valid()), Ok(()));
    }

    #[test]
    fn missing_addresses() {
        let config = FirewallConfig {
            local_address: String::new(),
            remote_address: String::new(),
            ..valid()
        };
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::Missing("local_address")));
        assert!(errors.contains(&ValidationError::Missing("remote_address")));
        assert!(!errors.contains(&ValidationError::SameAddress));
    }

    #[test]
    fn same_address_rejected() {
        let config = FirewallConfig {
            remote_address: "127.0.0.1:6432".to_string(),
            ..valid()
        };
        assert_eq!(validate_config(&config), Err(vec![ValidationError::SameAddress]));
    }

    #[test]
    fn unparseable_address_rejected() {
        let config = FirewallConfig {
            local_address: "not an address".to_string(),
            ..valid()
        };
        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(
            errors.as_slice(),
            [ValidationError::InvalidAddress { field: "local_address", .. }]
        ));
    }

    #[test]
    fn collects_every_limit_error() {
        let config = FirewallConfig {
            connection_limit: 0,
            per_ip_connection_limit: 0,
            ..valid()
        };
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::NonPositive("connection_limit"),
                ValidationError::NonPositive("per_ip_connection_limit"),
            ]
        );
    }

    #[test]
    fn per_ip_above_global_rejected() {
        let config = FirewallConfig {
            connection_limit: 2,
            per_ip_connection_limit: 3,
            ..valid()
        };
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::PerIpExceedsGlobal { per_ip: 3, global: 2 }])
        );
    }

    #[test]
    fn rate_without_capacity_rejected() {
        let mut config = valid();
        config.rate_limiter.token_bucket_limiter.rate = 5;
        assert_eq!(validate_config(&config), Err(vec![ValidationError::ZeroCapacity]));

        config.rate_limiter.token_bucket_limiter.capacity = 5;
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = valid();
        config.observability.metrics_address = "nope".to_string();
        assert_eq!(validate_config(&config), Ok(()));

        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
