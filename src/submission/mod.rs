//! Sequencer submission subsystem.
//!
//! # Data Flow
//! ```text
//! MessageBatcher::drain()
//!     → submitter.rs (nonce check per message, in order)
//!     → sequencer.rs (Sequencer::submit, one call per batch)
//!
//! Shutdown:
//!     coordinator request (loop actor)
//!     → final round → acknowledge
//! ```

pub mod message;
pub mod sequencer;
pub mod submitter;

pub use message::ChainMessage;
pub use sequencer::{BatchId, LoggingSequencer, Sequencer, SequencerError, SignedMessage};
pub use submitter::{SubmissionReport, SubmitError, Submitter};
