//! Replay protection subsystem.
//!
//! # Data Flow
//! ```text
//! (sender, nonce) from transaction admission
//!     → guard.rs (namespace key, strict > floor check)
//!     → store.rs (load floor, compare-and-set)
//!         → file.rs   durable JSON file, locked per call
//!         → MemoryNonceStore   tests / development
//! ```
//!
//! # Design Decisions
//! - Strict high-water mark: equal and lower nonces are both replays
//! - Optimistic concurrency: a lost compare-and-set re-reads and re-checks
//! - Store faults are propagated, never retried here
//! - Records are never deleted by this crate

pub mod file;
pub mod guard;
pub mod store;

pub use file::FileNonceStore;
pub use guard::{NonceError, NonceGuard, NonceResult};
pub use store::{MemoryNonceStore, NonceStore, StoreError, StoreResult};
