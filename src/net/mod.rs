//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, admission)
//!     → connection.rs (session id, state machine, client IP)
//!     → Hand off to relay layer
//!
//! Session States:
//!     Created → Dialing → Relaying → Closing → Closed
//! ```
//!
//! # Design Decisions
//! - Rejected connections are closed before a single byte is read
//! - Every session is tracked in a join set so shutdown can drain it

pub mod connection;
pub mod listener;

pub use listener::{Listener, ListenerError};
