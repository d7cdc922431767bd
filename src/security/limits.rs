//! Connection slot accounting.
//!
//! # Responsibilities
//! - Track active relayed connections, globally and per source IP
//! - Enforce the global and per-IP connection ceilings
//! - Count accepted and rejected admissions
//!
//! # Design Decisions
//! - Check-then-increment happens inside one critical section
//! - Global limit is checked before the per-IP limit
//! - Slots are released by an RAII guard so every registration has exactly one release

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use crate::security::admission::RejectReason;

/// Connection ceilings enforced by the register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Maximum concurrent connections across all clients.
    pub global: usize,
    /// Maximum concurrent connections from one source IP.
    pub per_ip: usize,
}

/// Point-in-time view of the register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterStats {
    pub active: usize,
    pub tracked_ips: usize,
    pub accepted: u64,
    pub rejected: u64,
}

#[derive(Debug)]
struct RegisterState {
    limits: ConnectionLimits,
    active_total: usize,
    active_by_ip: HashMap<IpAddr, usize>,
    accepted: u64,
    rejected: u64,
}

/// Process-wide bookkeeping of active connections.
#[derive(Debug)]
pub struct ConnectionRegister {
    state: Mutex<RegisterState>,
}

impl ConnectionRegister {
    pub fn new(limits: ConnectionLimits) -> Self {
        Self {
            state: Mutex::new(RegisterState {
                limits,
                active_total: 0,
                active_by_ip: HashMap::new(),
                accepted: 0,
                rejected: 0,
            }),
        }
    }

    /// Try to take a slot for `ip`.
    ///
    /// A successful call must be paired with exactly one [`unregister`](Self::unregister).
    /// Prefer [`try_acquire`](Self::try_acquire), which does the pairing automatically.
    pub fn try_register(&self, ip: IpAddr) -> Result<(), RejectReason> {
        let mut state = self.state.lock().expect("connection register mutex poisoned");

        if state.active_total >= state.limits.global {
            state.rejected += 1;
            return Err(RejectReason::ConnectionLimit);
        }

        let per_ip = state.active_by_ip.get(&ip).copied().unwrap_or(0);
        if per_ip >= state.limits.per_ip {
            state.rejected += 1;
            return Err(RejectReason::PerIpLimit);
        }

        state.active_total += 1;
        *state.active_by_ip.entry(ip).or_insert(0) += 1;
        state.accepted += 1;
        Ok(())
    }

    /// Release a slot previously taken by [`try_register`](Self::try_register).
    pub fn unregister(&self, ip: IpAddr) {
        let mut state = self.state.lock().expect("connection register mutex poisoned");

        match state.active_total.checked_sub(1) {
            Some(total) => state.active_total = total,
            None => tracing::error!(client_ip = %ip, "Unregister without a matching registration"),
        }

        if let Some(count) = state.active_by_ip.get_mut(&ip) {
            if *count <= 1 {
                state.active_by_ip.remove(&ip);
            } else {
                *count -= 1;
            }
        }
    }

    /// Try to take a slot, returning a guard that releases it on drop.
    pub fn try_acquire(self: &Arc<Self>, ip: IpAddr) -> Result<ConnectionSlot, RejectReason> {
        self.try_register(ip)?;
        Ok(ConnectionSlot {
            register: Arc::clone(self),
            ip,
        })
    }

    /// Replace the limits. Existing connections are never closed by a lower limit.
    pub fn set_limits(&self, limits: ConnectionLimits) {
        let mut state = self.state.lock().expect("connection register mutex poisoned");
        if state.limits != limits {
            tracing::info!(
                connection_limit = limits.global,
                per_ip_connection_limit = limits.per_ip,
                "Connection limits updated"
            );
            state.limits = limits;
        }
    }

    pub fn limits(&self) -> ConnectionLimits {
        self.state.lock().expect("connection register mutex poisoned").limits
    }

    pub fn active_connections_count(&self) -> usize {
        self.state.lock().expect("connection register mutex poisoned").active_total
    }

    pub fn ip_connections_count(&self, ip: IpAddr) -> usize {
        let state = self.state.lock().expect("connection register mutex poisoned");
        state.active_by_ip.get(&ip).copied().unwrap_or(0)
    }

    pub fn stats(&self) -> RegisterStats {
        let state = self.state.lock().expect("connection register mutex poisoned");
        RegisterStats {
            active: state.active_total,
            tracked_ips: state.active_by_ip.len(),
            accepted: state.accepted,
            rejected: state.rejected,
        }
    }
}

/// One admitted connection's share of the register.
///
/// Dropping the slot releases it.
#[derive(Debug)]
pub struct ConnectionSlot {
    register: Arc<ConnectionRegister>,
    ip: IpAddr,
}

impl ConnectionSlot {
    pub fn ip(&self) -> IpAddr {
        self.ip
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.register.unregister(self.ip);
        tracing::trace!(client_ip = %self.ip, "Connection slot released");
    }
}
