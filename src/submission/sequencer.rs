//! Outbound seam to the external sequencer.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Correlation ID for one drained batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

/// A message carrying the identity and nonce used for replay protection.
pub trait SignedMessage {
    fn sender(&self) -> &str;
    fn nonce(&self) -> u64;
}

/// Errors reported by a sequencer client.
#[derive(Debug, Error)]
pub enum SequencerError {
    /// The sequencer could not be reached.
    #[error("sequencer unavailable: {0}")]
    Unavailable(String),

    /// The sequencer refused the batch.
    #[error("sequencer rejected batch: {0}")]
    Rejected(String),
}

/// Destination for accepted batches.
#[async_trait]
pub trait Sequencer<M: Sync>: Send + Sync {
    /// Forward one batch. Messages are in send order.
    async fn submit(&self, batch_id: BatchId, messages: &[M]) -> Result<(), SequencerError>;
}

/// Sequencer that only logs what it would forward.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSequencer;

#[async_trait]
impl<M> Sequencer<M> for LoggingSequencer
where
    M: Serialize + Sync,
{
    async fn submit(&self, batch_id: BatchId, messages: &[M]) -> Result<(), SequencerError> {
        let bytes = serde_json::to_vec(messages)
            .map_err(|e| SequencerError::Rejected(e.to_string()))?;
        tracing::info!(
            batch_id = %batch_id,
            count = messages.len(),
            bytes = bytes.len(),
            "Batch forwarded"
        );
        Ok(())
    }
}
