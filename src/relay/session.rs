//! Relay session: one admitted client relayed to the backend.
//!
//! # Responsibilities
//! - Dial the backend for an admitted client
//! - Run one pump per direction until the first terminal event
//! - Enforce the shared idle deadline
//! - Tear down exactly once: stop pumps, close sockets, release the slot,
//!   emit the completion record

use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::Instrument;

use crate::net::connection::{ConnectionId, SessionState};
use crate::observability::metrics;
use crate::relay::idle::IdleDeadline;
use crate::relay::pump::{pump, Direction, PumpShared};
use crate::relay::termination::CloseCause;
use crate::security::ConnectionSlot;

/// Per-session relay settings, fixed when the session is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    /// Backend address, resolved on every dial.
    pub backend_address: String,
    /// Idle timeout shared by both directions (`None` disables it).
    pub idle_timeout: Option<Duration>,
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// The backend could not be reached; nothing was relayed.
    DialFailed(io::Error),
    /// Relaying started and ended for the given cause.
    Closed(CloseCause),
}

impl SessionOutcome {
    /// Reason attached to the completion record, if any.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            SessionOutcome::DialFailed(_) => Some("dial_failed"),
            SessionOutcome::Closed(cause) => cause.reason(),
        }
    }
}

/// Completion record of a finished session.
#[derive(Debug)]
pub struct SessionSummary {
    pub id: ConnectionId,
    pub client_ip: IpAddr,
    pub duration: Duration,
    /// Bytes relayed client → backend.
    pub bytes_in: u64,
    /// Bytes relayed backend → client.
    pub bytes_out: u64,
    pub outcome: SessionOutcome,
}

/// One client↔backend relay.
///
/// Owns the client stream and the admission slot; both are released when
/// [`run`](Self::run) returns, on every path.
pub struct RelaySession<S = TcpStream> {
    id: ConnectionId,
    client: S,
    slot: ConnectionSlot,
    settings: Arc<RelaySettings>,
    shutdown: Option<broadcast::Receiver<()>>,
    started: Instant,
}

impl<S> RelaySession<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(client: S, slot: ConnectionSlot, settings: Arc<RelaySettings>) -> Self {
        Self {
            id: ConnectionId::new(),
            client,
            slot,
            settings,
            shutdown: None,
            started: Instant::now(),
        }
    }

    /// Force-close the session when this receiver gets a message.
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn client_ip(&self) -> IpAddr {
        self.slot.ip()
    }

    /// Relay until either side closes, fails or goes idle.
    pub async fn run(self) -> SessionSummary {
        let span = tracing::info_span!(
            "session",
            connection_id = %self.id,
            client_ip = %self.slot.ip(),
        );
        self.drive().instrument(span).await
    }

    async fn drive(self) -> SessionSummary {
        let RelaySession {
            id,
            client,
            slot,
            settings,
            mut shutdown,
            started,
        } = self;

        let mut completion = Completion {
            id,
            client_ip: slot.ip(),
            slot: Some(slot),
            started,
            shared: None,
            pumps: Vec::new(),
        };
        let mut state = SessionState::Created;

        transition(&mut state, SessionState::Dialing);
        tracing::debug!(backend = %settings.backend_address, "Connecting to backend");

        let backend = match TcpStream::connect(settings.backend_address.as_str()).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(
                    event = "dial_failed",
                    backend = %settings.backend_address,
                    error = %e,
                    "Backend connection failed"
                );
                drop(client);
                transition(&mut state, SessionState::Closed);
                return completion.finish(SessionOutcome::DialFailed(e));
            }
        };
        if let Err(e) = backend.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY on backend socket");
        }

        transition(&mut state, SessionState::Relaying);
        let shared = Arc::new(PumpShared::new(IdleDeadline::new(settings.idle_timeout)));
        completion.shared = Some(Arc::clone(&shared));

        let (client_read, client_write) = tokio::io::split(client);
        let (backend_read, backend_write) = backend.into_split();

        let upstream = spawn_pump(client_read, backend_write, Direction::ClientToBackend, &shared);
        let downstream = spawn_pump(backend_read, client_write, Direction::BackendToClient, &shared);
        completion.pumps = vec![upstream.abort_handle(), downstream.abort_handle()];

        let cause = tokio::select! {
            cause = shared.termination.closed() => cause,
            () = shared.idle.expired() => {
                shared.termination.fire(CloseCause::IdleTimeout);
                shared.termination.closed().await
            }
            () = shutdown_requested(&mut shutdown) => {
                shared.termination.fire(CloseCause::Shutdown);
                shared.termination.closed().await
            }
        };

        transition(&mut state, SessionState::Closing);
        // Aborting drops each pump's stream halves, which closes both sockets.
        stop_pump(upstream).await;
        stop_pump(downstream).await;

        transition(&mut state, SessionState::Closed);
        completion.finish(SessionOutcome::Closed(cause))
    }
}

fn transition(state: &mut SessionState, next: SessionState) {
    tracing::trace!(from = %state, to = %next, "Session state change");
    *state = next;
}

fn spawn_pump<R, W>(src: R, dst: W, direction: Direction, shared: &Arc<PumpShared>) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let shared = Arc::clone(shared);
    tokio::spawn(
        async move { pump(src, dst, direction, &shared).await }.in_current_span(),
    )
}

async fn stop_pump(handle: JoinHandle<()>) {
    handle.abort();
    if let Err(e) = handle.await {
        if e.is_panic() {
            tracing::error!(error = %e, "Relay pump panicked");
        }
    }
}

async fn shutdown_requested(shutdown: &mut Option<broadcast::Receiver<()>>) {
    if let Some(rx) = shutdown {
        match rx.recv().await {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => return,
            // Coordinator gone without ever asking for a close.
            Err(broadcast::error::RecvError::Closed) => {}
        }
    }
    std::future::pending::<()>().await
}

/// Holds the slot until the completion record is emitted.
///
/// A session task dropped before it finishes (aborted once the force-close
/// grace period is over) stops its pumps, releases the slot and still emits
/// the record, with cause `shutdown`.
struct Completion {
    id: ConnectionId,
    client_ip: IpAddr,
    slot: Option<ConnectionSlot>,
    started: Instant,
    shared: Option<Arc<PumpShared>>,
    pumps: Vec<AbortHandle>,
}

impl Completion {
    fn finish(mut self, outcome: SessionOutcome) -> SessionSummary {
        self.record(outcome)
    }

    fn record(&mut self, outcome: SessionOutcome) -> SessionSummary {
        drop(self.slot.take());

        let (bytes_in, bytes_out) = self
            .shared
            .as_ref()
            .map_or((0, 0), |shared| (shared.bytes_in(), shared.bytes_out()));
        let summary = SessionSummary {
            id: self.id,
            client_ip: self.client_ip,
            duration: self.started.elapsed(),
            bytes_in,
            bytes_out,
            outcome,
        };

        let client_ip = summary.client_ip;
        let duration_ms = summary.duration.as_millis() as u64;
        match summary.outcome.reason() {
            Some(reason) => tracing::info!(
                event = "connection_closed",
                client_ip = %client_ip,
                duration_ms,
                bytes_in,
                bytes_out,
                reason,
                "Connection closed"
            ),
            None => tracing::info!(
                event = "connection_closed",
                client_ip = %client_ip,
                duration_ms,
                bytes_in,
                bytes_out,
                "Connection closed"
            ),
        }
        metrics::record_session_closed(&summary);

        summary
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.slot.is_none() {
            return;
        }
        tracing::warn!("Session aborted before teardown");
        for pump in &self.pumps {
            pump.abort();
        }
        self.record(SessionOutcome::Closed(CloseCause::Shutdown));
    }
}
