//! Outbound message batching.
//!
//! # Data Flow
//! ```text
//! systems / request handlers (many)
//!     → MessageBatcher::send (append under lock)
//! submitter (one)
//!     → MessageBatcher::drain (swap queue for a fresh one)
//!     → nonce checks → sequencer
//! ```
//!
//! # Design Decisions
//! - The live queue is never exposed; producers only append
//! - Drain swaps the whole Vec, so the critical section is O(1)
//! - Unbounded by default; `try_send` offers a reject policy when a limit is set

pub mod batcher;

pub use batcher::{BatchError, MessageBatcher};

