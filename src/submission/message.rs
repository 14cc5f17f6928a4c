//! Chain message envelope produced by the world.

use serde::{Deserialize, Serialize};

use crate::submission::sequencer::SignedMessage;

/// An outbound message bound for the sequencer.
///
/// The payload is opaque to this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainMessage {
    /// Signer address or persona of the originator.
    pub sender: String,
    /// Per-sender sequence number.
    pub nonce: u64,
    /// Tick on which the message was produced.
    pub tick: u64,
    pub payload: serde_json::Value,
}

impl ChainMessage {
    pub fn new(sender: impl Into<String>, nonce: u64, tick: u64, payload: serde_json::Value) -> Self {
        Self {
            sender: sender.into(),
            nonce,
            tick,
            payload,
        }
    }
}

impl SignedMessage for ChainMessage {
    fn sender(&self) -> &str {
        &self.sender
    }

    fn nonce(&self) -> u64 {
        self.nonce
    }
}
