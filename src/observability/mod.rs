//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Listener and relay sessions produce:
//!     → logging.rs (structured events: connection_accepted,
//!                   connection_rejected, connection_closed)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every session runs in a `session` span carrying its id and client IP
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
