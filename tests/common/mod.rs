//! Shared utilities for integration tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use worldsync::batching::MessageBatcher;
use worldsync::nonce::{MemoryNonceStore, NonceGuard, NonceStore};
use worldsync::submission::{BatchId, ChainMessage, Sequencer, SequencerError, Submitter};

/// Sequencer that remembers every batch it was given.
#[derive(Default)]
pub struct RecordingSequencer {
    batches: Mutex<Vec<(BatchId, Vec<ChainMessage>)>>,
}

impl RecordingSequencer {
    /// All forwarded messages as `(sender, nonce)`, in forwarding order.
    pub fn forwarded(&self) -> Vec<(String, u64)> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, messages)| messages.iter().map(|m| (m.sender.clone(), m.nonce)))
            .collect()
    }
}

#[async_trait]
impl Sequencer<ChainMessage> for RecordingSequencer {
    async fn submit(
        &self,
        batch_id: BatchId,
        messages: &[ChainMessage],
    ) -> Result<(), SequencerError> {
        self.batches
            .lock()
            .unwrap()
            .push((batch_id, messages.to_vec()));
        Ok(())
    }
}

pub fn msg(sender: &str, nonce: u64) -> ChainMessage {
    ChainMessage::new(sender, nonce, 0, serde_json::json!({ "op": "noop" }))
}

pub struct Pipeline {
    pub batcher: Arc<MessageBatcher<ChainMessage>>,
    pub sequencer: Arc<RecordingSequencer>,
    pub submitter: Arc<Submitter<ChainMessage>>,
}

/// Batcher, memory-backed guard and recording sequencer wired to a submitter.
#[allow(dead_code)]
pub fn pipeline() -> Pipeline {
    pipeline_with_store(Arc::new(MemoryNonceStore::new()))
}

#[allow(dead_code)]
pub fn pipeline_with_store(store: Arc<dyn NonceStore>) -> Pipeline {
    let batcher = Arc::new(MessageBatcher::new(10));
    let guard = Arc::new(NonceGuard::new(store, "world").unwrap());
    let sequencer = Arc::new(RecordingSequencer::default());
    let submitter = Arc::new(Submitter::new(
        Arc::clone(&batcher),
        guard,
        Arc::clone(&sequencer) as Arc<dyn Sequencer<ChainMessage>>,
    ));
    Pipeline {
        batcher,
        sequencer,
        submitter,
    }
}
