//! Admission control for new connections.
//!
//! Rate limiting runs first so abusive retry storms are turned away before
//! they compete for connection slots.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use crate::security::limits::{ConnectionRegister, ConnectionSlot};
use crate::security::rate_limit::RateLimiter;

/// Why a connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// The source IP ran out of rate limiter tokens.
    RateLimit,
    /// The global connection ceiling is reached.
    ConnectionLimit,
    /// The source IP's connection ceiling is reached.
    PerIpLimit,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::RateLimit => "rate_limit",
            RejectReason::ConnectionLimit => "connection_limit",
            RejectReason::PerIpLimit => "per_ip_limit",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single accept/reject decision for an incoming source address.
#[derive(Clone)]
pub struct AdmissionController {
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    register: Arc<ConnectionRegister>,
}

impl AdmissionController {
    /// A missing rate limiter admits every IP as far as rate is concerned.
    pub fn new(register: Arc<ConnectionRegister>, rate_limiter: Option<Arc<dyn RateLimiter>>) -> Self {
        Self {
            rate_limiter,
            register,
        }
    }

    /// Decide whether `ip` may open a new relayed connection.
    ///
    /// On success the returned slot must live as long as the connection.
    pub fn admit(&self, ip: IpAddr) -> Result<ConnectionSlot, RejectReason> {
        if let Some(limiter) = &self.rate_limiter {
            if !limiter.allow(ip) {
                return Err(RejectReason::RateLimit);
            }
        }

        self.register.try_acquire(ip)
    }
}

impl fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionController")
            .field("rate_limited", &self.rate_limiter.is_some())
            .field("register", &self.register)
            .finish()
    }
}
