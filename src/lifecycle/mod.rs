//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Stage (stage.rs):
//!     PreStart → Starting → Running → ShuttingDown → ShutDown
//!     read by producers, swapped by the host
//!
//! Shutdown (shutdown.rs):
//!     operator signal → shutdown_all()
//!         → server actor: request → cleanup → ack
//!         → loop actor:   request → cleanup → ack
//!         → Stage::ShutDown
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger shutdown_all()
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: server first, loop second, so no new work reaches a stopped loop
//! - Every handshake has a deadline; the host decides what a timeout means

pub mod shutdown;
pub mod signals;
pub mod stage;

pub use shutdown::{Actor, ShutdownCoordinator, ShutdownError};
pub use signals::{wait_for_signal, ShutdownSignal};
pub use stage::{Stage, StageRegister};
