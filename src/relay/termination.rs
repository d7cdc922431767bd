//! Single-fire session termination signal.
//!
//! Any number of tasks may report a terminal condition; only the first report
//! is kept, classified and logged. Later reports are discarded.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::relay::pump::Direction;

/// Which half of a pump iteration failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStage {
    Read,
    Write,
}

impl fmt::Display for PumpStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpStage::Read => f.write_str("read"),
            PumpStage::Write => f.write_str("write"),
        }
    }
}

/// What ended a relay session.
#[derive(Debug)]
pub enum CloseCause {
    /// The source side of a pump reached end of stream.
    Eof(Direction),
    /// No traffic in either direction within the idle timeout.
    IdleTimeout,
    /// The process is shutting down and the drain period is over.
    Shutdown,
    /// A read or write failed.
    Io {
        direction: Direction,
        stage: PumpStage,
        source: io::Error,
    },
}

impl CloseCause {
    /// Reason attached to the `connection_closed` record, if any.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            CloseCause::Eof(_) => None,
            CloseCause::IdleTimeout => Some("idle_timeout"),
            CloseCause::Shutdown => Some("shutdown"),
            CloseCause::Io { .. } => Some("io_error"),
        }
    }

    fn log(&self) {
        match self {
            CloseCause::Eof(direction) => {
                tracing::debug!(%direction, "Stream ended");
            }
            CloseCause::IdleTimeout => {
                tracing::info!("Idle timeout reached");
            }
            CloseCause::Shutdown => {
                tracing::info!("Closing session for shutdown");
            }
            CloseCause::Io { direction, stage, source } => {
                tracing::warn!(%direction, %stage, error = %source, "Relay I/O failed");
            }
        }
    }
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseCause::Eof(direction) => write!(f, "end of stream ({})", direction),
            CloseCause::IdleTimeout => write!(f, "idle timeout"),
            CloseCause::Shutdown => write!(f, "shutdown"),
            CloseCause::Io { direction, stage, source } => {
                write!(f, "{} failed ({}): {}", stage, direction, source)
            }
        }
    }
}

/// Once-only "closed" event shared by a session's driver and pumps.
#[derive(Debug, Default)]
pub struct Termination {
    fired: AtomicBool,
    cause: Mutex<Option<CloseCause>>,
    notify: Notify,
}

impl Termination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a terminal condition. Returns `true` only for the first report.
    pub fn fire(&self, cause: CloseCause) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!(cause = %cause, "Discarding duplicate close report");
            return false;
        }

        cause.log();
        *self.cause.lock().expect("termination mutex poisoned") = Some(cause);
        self.notify.notify_one();
        true
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Wait for the first reported cause.
    ///
    /// The cause is handed out once; only the session driver should wait.
    pub async fn closed(&self) -> CloseCause {
        loop {
            let cause = self.cause.lock().expect("termination mutex poisoned").take();
            if let Some(cause) = cause {
                return cause;
            }
            self.notify.notified().await;
        }
    }
}
