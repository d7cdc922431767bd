//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming connection (peer IP):
//!     → rate_limit.rs (per-IP token bucket)
//!     → limits.rs (global and per-IP connection slots)
//!     → admission.rs (single accept/reject decision)
//!     → ConnectionSlot handed to the relay session
//! ```
//!
//! # Design Decisions
//! - Fail closed: any failed check rejects the connection
//! - Each shared structure has its own mutex, so limiter contention never
//!   blocks on register contention
//! - No trust in client input: limits are keyed by the socket peer address

pub mod admission;
pub mod limits;
pub mod rate_limit;

pub use admission::{AdmissionController, RejectReason};
pub use limits::{ConnectionLimits, ConnectionRegister, ConnectionSlot, RegisterStats};
pub use rate_limit::{RateLimiter, TokenBucketLimiter, TokenBucketParams};
