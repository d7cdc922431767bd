//! Relay subsystem.
//!
//! # Data Flow
//! ```text
//! Admitted client (stream + ConnectionSlot)
//!     → session.rs (dial backend, spawn pumps, wait for termination)
//!     → pump.rs ×2 (client → backend, backend → client)
//!         ├─ idle.rs (every read/write pushes the shared deadline)
//!         └─ termination.rs (first terminal event wins)
//!     → session.rs (abort pumps, close sockets, release slot, emit record)
//!
//! Session States:
//!     Created → Dialing → Relaying → Closing → Closed
//! ```
//!
//! # Design Decisions
//! - Bytes are relayed verbatim; the proxied protocol is opaque
//! - The idle timeout spans the whole session, either direction resets it
//! - Pumps share only an `Arc<PumpShared>`, never each other
//! - Slot release is tied to ownership, so it happens exactly once

pub mod idle;
pub mod pump;
pub mod session;
pub mod termination;

pub use pump::Direction;
pub use session::{RelaySession, RelaySettings, SessionOutcome, SessionSummary};
pub use termination::{CloseCause, PumpStage};
