//! TCP accept loop with admission control.
//!
//! # Responsibilities
//! - Bind to the configured local address
//! - Accept incoming TCP connections and run admission for each peer IP
//! - Spawn a relay session per admitted connection
//! - Apply configuration updates live
//! - Drain sessions on shutdown

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinSet};

use crate::config::{FirewallConfig, ShutdownConfig};
use crate::lifecycle::Shutdown;
use crate::net::connection::client_ip;
use crate::observability::metrics;
use crate::relay::{RelaySession, RelaySettings, SessionSummary};
use crate::security::{AdmissionController, ConnectionRegister, RateLimiter, TokenBucketLimiter};

/// Pause after a transient accept failure (e.g. descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// How long force-closed sessions get to tear down before they are aborted.
const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    /// The listening socket failed.
    #[error("Failed to accept: {0}")]
    Accept(#[source] io::Error),
}

/// The firewall's front door: accepts, admits and relays.
pub struct Listener {
    inner: TcpListener,
    local_address: String,
    admission: AdmissionController,
    register: Arc<ConnectionRegister>,
    rate_limiter: Arc<TokenBucketLimiter>,
    relay: ArcSwap<RelaySettings>,
    shutdown_config: ArcSwap<ShutdownConfig>,
    sessions_close: Shutdown,
}

impl Listener {
    /// Bind to `local_address` and build admission state from the config.
    pub async fn bind(config: &FirewallConfig) -> Result<Self, ListenerError> {
        let inner = TcpListener::bind(config.local_address.as_str())
            .await
            .map_err(|source| ListenerError::Bind {
                address: config.local_address.clone(),
                source,
            })?;

        let listener = Self::from_listener(inner, config);
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(
                address = %addr,
                backend = %config.remote_address,
                connection_limit = config.connection_limit,
                per_ip_connection_limit = config.per_ip_connection_limit,
                "Listener bound"
            );
        }
        Ok(listener)
    }

    /// Wrap an already bound socket.
    pub fn from_listener(inner: TcpListener, config: &FirewallConfig) -> Self {
        let register = Arc::new(ConnectionRegister::new(config.limits()));
        let rate_limiter = Arc::new(TokenBucketLimiter::new(config.token_bucket()));
        let admission = AdmissionController::new(
            Arc::clone(&register),
            Some(Arc::clone(&rate_limiter) as Arc<dyn RateLimiter>),
        );

        Self {
            inner,
            local_address: config.local_address.clone(),
            admission,
            register,
            rate_limiter,
            relay: ArcSwap::from_pointee(config.relay_settings()),
            shutdown_config: ArcSwap::from_pointee(config.shutdown.clone()),
            sessions_close: Shutdown::new(),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, io::Error> {
        self.inner.local_addr()
    }

    pub fn register(&self) -> Arc<ConnectionRegister> {
        Arc::clone(&self.register)
    }

    pub fn rate_limiter(&self) -> Arc<TokenBucketLimiter> {
        Arc::clone(&self.rate_limiter)
    }

    /// Settings new sessions will be created with.
    pub fn relay_settings(&self) -> Arc<RelaySettings> {
        self.relay.load_full()
    }

    /// Apply a reloaded configuration to admission and future sessions.
    pub fn apply_config(&self, config: &FirewallConfig) {
        self.register.set_limits(config.limits());
        self.rate_limiter.reconfigure(config.token_bucket());

        let relay = config.relay_settings();
        if **self.relay.load() != relay {
            tracing::info!(
                backend = %relay.backend_address,
                idle_timeout_secs = config.idle_timeout_secs,
                "Relay settings updated for new connections"
            );
            self.relay.store(Arc::new(relay));
        }

        self.shutdown_config.store(Arc::new(config.shutdown.clone()));

        if config.local_address != self.local_address {
            tracing::warn!(
                current = %self.local_address,
                requested = %config.local_address,
                "local_address changed; restart required to rebind"
            );
        }
    }

    /// Accept until shutdown or a fatal accept error, then drain sessions.
    pub async fn run(
        self,
        mut config_updates: mpsc::UnboundedReceiver<FirewallConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let mut sessions = JoinSet::new();
        let mut updates_open = true;

        let result = loop {
            tokio::select! {
                accepted = self.inner.accept() => match accepted {
                    Ok((stream, peer)) => self.handle(stream, peer, &mut sessions),
                    Err(e) if is_transient(&e) => {
                        tracing::warn!(error = %e, "Accept failed, continuing");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Accept stopped");
                        break Err(ListenerError::Accept(e));
                    }
                },
                update = config_updates.recv(), if updates_open => match update {
                    Some(config) => self.apply_config(&config),
                    None => updates_open = false,
                },
                Some(joined) = sessions.join_next() => reap(&self.register, joined),
                _ = shutdown.recv() => {
                    tracing::info!("Shutting down, no longer accepting connections");
                    break Ok(());
                }
            }
        };

        let Listener {
            inner,
            register,
            shutdown_config,
            sessions_close,
            ..
        } = self;
        // Closing the socket stops the kernel from queueing new clients.
        drop(inner);

        let drain_timeout = shutdown_config.load().drain_timeout();
        drain(sessions, &register, drain_timeout, &sessions_close).await;
        result
    }

    fn handle(&self, stream: TcpStream, peer: SocketAddr, sessions: &mut JoinSet<SessionSummary>) {
        let ip = client_ip(peer);

        let slot = match self.admission.admit(ip) {
            Ok(slot) => slot,
            Err(reason) => {
                drop(stream);
                tracing::warn!(
                    event = "connection_rejected",
                    client_ip = %ip,
                    reason = %reason,
                    "Connection rejected"
                );
                metrics::record_rejected(reason);
                return;
            }
        };

        let active = self.register.active_connections_count();
        tracing::info!(
            event = "connection_accepted",
            client_ip = %ip,
            active_connections = active,
            "Connection accepted"
        );
        metrics::record_accepted(active);

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY on client socket");
        }

        let session = RelaySession::new(stream, slot, self.relay.load_full())
            .with_shutdown(self.sessions_close.subscribe());
        sessions.spawn(session.run());
    }
}

fn reap(register: &ConnectionRegister, joined: Result<SessionSummary, JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "Relay session panicked");
        }
    }
    metrics::set_active_connections(register.active_connections_count());
}

/// Wait for sessions to finish, force-closing them after `drain_timeout`.
async fn drain(
    mut sessions: JoinSet<SessionSummary>,
    register: &ConnectionRegister,
    drain_timeout: Duration,
    sessions_close: &Shutdown,
) {
    if sessions.is_empty() {
        return;
    }

    tracing::info!(
        sessions = sessions.len(),
        drain_timeout_secs = drain_timeout.as_secs(),
        "Draining relay sessions"
    );

    let drained = tokio::time::timeout(drain_timeout, async {
        while let Some(joined) = sessions.join_next().await {
            reap(register, joined);
        }
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            remaining = sessions.len(),
            "Drain timeout reached, closing remaining sessions"
        );
        sessions_close.trigger();

        let closed = tokio::time::timeout(FORCE_CLOSE_GRACE, async {
            while let Some(joined) = sessions.join_next().await {
                reap(register, joined);
            }
        })
        .await;

        // Sessions still dialing do not watch the close signal. Aborted
        // sessions release their slot and emit their record on drop.
        if closed.is_err() {
            tracing::warn!(remaining = sessions.len(), "Aborting sessions that did not close");
            sessions.shutdown().await;
        }
    }

    metrics::set_active_connections(register.active_connections_count());
    tracing::info!("All relay sessions closed");
}

/// Accept errors that concern a single pending connection, not the socket.
fn is_transient(e: &io::Error) -> bool {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => true,
        // ENFILE / EMFILE
        _ => matches!(e.raw_os_error(), Some(23) | Some(24)),
    }
}
