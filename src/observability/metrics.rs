//! Metrics collection and exposition.
//!
//! # Metrics
//! - `firewall_connections_accepted_total` (counter)
//! - `firewall_connections_rejected_total` (counter): by reason
//! - `firewall_active_connections` (gauge): current relayed connections
//! - `firewall_sessions_closed_total` (counter): by close reason
//! - `firewall_session_duration_seconds` (histogram)
//! - `firewall_bytes_total` (counter): by direction
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed, so tests need no setup
//! - Label values are static strings

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::relay::SessionSummary;
use crate::security::RejectReason;

/// Install the Prometheus exporter with an HTTP scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_accepted(active: usize) {
    ::metrics::counter!("firewall_connections_accepted_total").increment(1);
    set_active_connections(active);
}

pub fn record_rejected(reason: RejectReason) {
    ::metrics::counter!("firewall_connections_rejected_total", "reason" => reason.as_str())
        .increment(1);
}

pub fn set_active_connections(active: usize) {
    ::metrics::gauge!("firewall_active_connections").set(active as f64);
}

pub fn record_session_closed(summary: &SessionSummary) {
    let reason = summary.outcome.reason().unwrap_or("eof");
    ::metrics::counter!("firewall_sessions_closed_total", "reason" => reason).increment(1);
    ::metrics::histogram!("firewall_session_duration_seconds")
        .record(summary.duration.as_secs_f64());
    ::metrics::counter!("firewall_bytes_total", "direction" => "client_to_backend")
        .increment(summary.bytes_in);
    ::metrics::counter!("firewall_bytes_total", "direction" => "backend_to_client")
        .increment(summary.bytes_out);
}
