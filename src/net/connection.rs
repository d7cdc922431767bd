//! Connection identity and lifecycle states.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Name the states a relayed connection moves through
//! - Normalize peer addresses into the IP used for limits

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Relay session state.
///
/// ```text
/// Created → Dialing → Relaying → Closing → Closed
///              └──────── dial failed ────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Admitted, backend not contacted yet.
    Created,
    /// Connecting to the backend.
    Dialing,
    /// Pumping bytes in both directions.
    Relaying,
    /// A terminal event fired; pumps are being stopped.
    Closing,
    /// Sockets closed and slot released.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Dialing => "dialing",
            SessionState::Relaying => "relaying",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// IP used for admission decisions.
///
/// IPv4-mapped IPv6 peers (dual-stack listeners) count as their IPv4 address.
pub fn client_ip(peer: SocketAddr) -> IpAddr {
    peer.ip().to_canonical()
}
