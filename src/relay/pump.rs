//! Unidirectional byte pump.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::relay::idle::IdleDeadline;
use crate::relay::termination::{CloseCause, PumpStage, Termination};

/// Read buffer size per pump.
pub const BUFFER_SIZE: usize = 64 * 1024;

/// Direction of a pump relative to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToBackend => f.write_str("client_to_backend"),
            Direction::BackendToClient => f.write_str("backend_to_client"),
        }
    }
}

/// State a session's pumps and driver share.
///
/// Pumps never reference each other, only this.
#[derive(Debug)]
pub struct PumpShared {
    pub idle: IdleDeadline,
    pub termination: Termination,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl PumpShared {
    pub fn new(idle: IdleDeadline) -> Self {
        Self {
            idle,
            termination: Termination::new(),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
        }
    }

    fn counter(&self, direction: Direction) -> &AtomicU64 {
        match direction {
            Direction::ClientToBackend => &self.bytes_in,
            Direction::BackendToClient => &self.bytes_out,
        }
    }

    /// Bytes relayed from client to backend.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Acquire)
    }

    /// Bytes relayed from backend to client.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Acquire)
    }
}

/// Copy bytes from `src` to `dst` until either side fails or `src` ends.
///
/// The terminal condition is reported to the shared termination signal.
pub async fn pump<R, W>(mut src: R, mut dst: W, direction: Direction, shared: &PumpShared)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    let counter = shared.counter(direction);

    loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => {
                shared.termination.fire(CloseCause::Eof(direction));
                return;
            }
            Ok(n) => n,
            Err(source) => {
                shared.termination.fire(CloseCause::Io {
                    direction,
                    stage: PumpStage::Read,
                    source,
                });
                return;
            }
        };
        shared.idle.refresh();

        if let Err(source) = dst.write_all(&buf[..n]).await {
            shared.termination.fire(CloseCause::Io {
                direction,
                stage: PumpStage::Write,
                source,
            });
            return;
        }
        counter.fetch_add(n as u64, Ordering::Release);
        shared.idle.refresh();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    struct BrokenWriter;

    impl AsyncWrite for BrokenWriter {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn shared() -> PumpShared {
        PumpShared::new(IdleDeadline::new(None))
    }

    #[tokio::test]
    async fn copies_until_eof_and_counts() {
        let shared = shared();
        let payload = b"SELECT 1;".repeat(10_000);
        let mut sink = Vec::new();

        pump(&payload[..], &mut sink, Direction::ClientToBackend, &shared).await;

        assert_eq!(sink, payload);
        assert_eq!(shared.bytes_in(), payload.len() as u64);
        assert_eq!(shared.bytes_out(), 0);
        assert!(matches!(
            shared.termination.closed().await,
            CloseCause::Eof(Direction::ClientToBackend)
        ));
    }

    #[tokio::test]
    async fn write_failure_is_reported_with_stage() {
        let shared = shared();

        pump(&b"hello"[..], BrokenWriter, Direction::BackendToClient, &shared).await;

        assert_eq!(shared.bytes_out(), 0);
        match shared.termination.closed().await {
            CloseCause::Io { direction, stage, source } => {
                assert_eq!(direction, Direction::BackendToClient);
                assert_eq!(stage, PumpStage::Write);
                assert_eq!(source.kind(), io::ErrorKind::BrokenPipe);
            }
            other => panic!("unexpected cause: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn traffic_refreshes_idle_deadline() {
        let shared = PumpShared::new(IdleDeadline::new(Some(std::time::Duration::from_secs(1))));
        let before = shared.idle.deadline().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        pump(&b"ping"[..], tokio::io::sink(), Direction::ClientToBackend, &shared).await;

        assert!(shared.idle.deadline().unwrap() > before);
    }
}
