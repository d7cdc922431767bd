//! Shared idle deadline for both directions of a session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// Deadline that any successful read or write pushes forward.
///
/// Stored as nanoseconds past a fixed origin so both pumps can refresh it
/// without locking.
#[derive(Debug)]
pub struct IdleDeadline {
    timeout: Option<Duration>,
    origin: Instant,
    deadline_nanos: AtomicU64,
}

impl IdleDeadline {
    /// Create a deadline armed at now + `timeout`. `None` never expires.
    pub fn new(timeout: Option<Duration>) -> Self {
        let deadline = Self {
            timeout,
            origin: Instant::now(),
            deadline_nanos: AtomicU64::new(0),
        };
        deadline.refresh();
        deadline
    }

    /// Push the deadline to now + timeout.
    pub fn refresh(&self) {
        if let Some(timeout) = self.timeout {
            let nanos = (self.origin.elapsed() + timeout).as_nanos() as u64;
            // Never move backwards if two pumps race.
            self.deadline_nanos.fetch_max(nanos, Ordering::Relaxed);
        }
    }

    /// Current deadline, if a timeout is configured.
    pub fn deadline(&self) -> Option<Instant> {
        self.timeout?;
        let nanos = self.deadline_nanos.load(Ordering::Relaxed);
        Some(self.origin + Duration::from_nanos(nanos))
    }

    /// Resolve once the deadline passes without being refreshed.
    pub async fn expired(&self) {
        let Some(mut deadline) = self.deadline() else {
            return std::future::pending().await;
        };

        loop {
            tokio::time::sleep_until(deadline).await;
            match self.deadline() {
                Some(current) if current > deadline => deadline = current,
                _ => return,
            }
        }
    }
}
