//! Drain-check-forward loop.
//!
//! # Responsibilities
//! - Drain the batcher on a fixed cadence
//! - Run every message through the nonce guard, in send order
//! - Forward accepted messages to the sequencer as one batch
//! - Act as the loop actor in the shutdown handshake
//!
//! # Design Decisions
//! - Replays are dropped and counted, not errors
//! - A store fault stops the round: the accepted prefix is forwarded, the
//!   unchecked remainder is kept and goes first next round
//! - A batch the sequencer refused is resubmitted unchanged next round,
//!   since its nonces are already spent

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::batching::MessageBatcher;
use crate::lifecycle::{Actor, ShutdownCoordinator, ShutdownError};
use crate::nonce::{NonceError, NonceGuard, StoreError};
use crate::submission::sequencer::{BatchId, Sequencer, SequencerError, SignedMessage};

/// Errors that end a submission round early.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The nonce store failed mid-round.
    #[error("nonce store failed during {batch_id}: {source}")]
    Storage {
        batch_id: BatchId,
        #[source]
        source: StoreError,
    },

    /// The sequencer did not take the batch.
    #[error("sequencer did not accept {batch_id}: {source}")]
    Sequencer {
        batch_id: BatchId,
        #[source]
        source: SequencerError,
    },
}

/// Outcome of one round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionReport {
    /// Set when the round had anything to process.
    pub batch_id: Option<BatchId>,
    /// Messages checked or carried over this round.
    pub total: usize,
    /// Messages forwarded to the sequencer.
    pub accepted: usize,
    /// Messages dropped as replays.
    pub rejected: usize,
}

impl SubmissionReport {
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

struct Carryover<M> {
    /// Drained but not yet checked.
    unchecked: Vec<M>,
    /// Checked and accepted but not yet taken by the sequencer.
    unsent: Option<(BatchId, Vec<M>)>,
}

/// The submission actor.
pub struct Submitter<M> {
    batcher: Arc<MessageBatcher<M>>,
    guard: Arc<NonceGuard>,
    sequencer: Arc<dyn Sequencer<M>>,
    carryover: Mutex<Carryover<M>>,
}

impl<M> Submitter<M>
where
    M: SignedMessage + Send + Sync + 'static,
{
    pub fn new(
        batcher: Arc<MessageBatcher<M>>,
        guard: Arc<NonceGuard>,
        sequencer: Arc<dyn Sequencer<M>>,
    ) -> Self {
        Self {
            batcher,
            guard,
            sequencer,
            carryover: Mutex::new(Carryover {
                unchecked: Vec::new(),
                unsent: None,
            }),
        }
    }

    /// Messages held back by an earlier failed round.
    pub async fn carried_over(&self) -> usize {
        let carry = self.carryover.lock().await;
        carry.unchecked.len() + carry.unsent.as_ref().map_or(0, |(_, m)| m.len())
    }

    /// Drain, check and forward once.
    pub async fn submit_round(&self) -> Result<SubmissionReport, SubmitError> {
        let mut carry = self.carryover.lock().await;

        if let Some((batch_id, messages)) = carry.unsent.take() {
            if let Err(source) = self.sequencer.submit(batch_id, &messages).await {
                carry.unsent = Some((batch_id, messages));
                return Err(SubmitError::Sequencer { batch_id, source });
            }
            tracing::info!(batch_id = %batch_id, count = messages.len(), "Resubmitted held batch");
        }

        let mut pending = std::mem::take(&mut carry.unchecked);
        pending.extend(self.batcher.drain());
        if pending.is_empty() {
            return Ok(SubmissionReport::default());
        }

        let batch_id = BatchId::new();
        let mut report = SubmissionReport {
            batch_id: Some(batch_id),
            total: pending.len(),
            ..SubmissionReport::default()
        };

        let mut accepted = Vec::with_capacity(pending.len());
        let mut fault = None;
        let mut messages = pending.into_iter();
        while let Some(message) = messages.next() {
            match self.guard.use_nonce(message.sender(), message.nonce()).await {
                Ok(()) => accepted.push(message),
                Err(NonceError::AlreadyUsed { .. }) => report.rejected += 1,
                Err(NonceError::StorageUnavailable(source)) => {
                    carry.unchecked.push(message);
                    carry.unchecked.extend(messages.by_ref());
                    fault = Some(source);
                    break;
                }
            }
        }
        report.accepted = accepted.len();

        if !accepted.is_empty() {
            if let Err(source) = self.sequencer.submit(batch_id, &accepted).await {
                carry.unsent = Some((batch_id, accepted));
                return Err(SubmitError::Sequencer { batch_id, source });
            }
        }

        if let Some(source) = fault {
            tracing::warn!(
                batch_id = %batch_id,
                forwarded = report.accepted,
                held = carry.unchecked.len(),
                "Nonce store failed mid-round"
            );
            return Err(SubmitError::Storage { batch_id, source });
        }

        tracing::debug!(
            batch_id = %batch_id,
            total = report.total,
            accepted = report.accepted,
            rejected = report.rejected,
            "Submission round complete"
        );
        Ok(report)
    }

    /// Submit on a fixed cadence until a loop shutdown request arrives.
    ///
    /// The shutdown cleanup performs one last round so nothing sent before
    /// the request is left behind.
    pub async fn run(
        self: Arc<Self>,
        coordinator: ShutdownCoordinator,
        interval: Duration,
    ) -> Result<(), ShutdownError> {
        tracing::info!(interval_ms = interval.as_millis() as u64, "Submitter started");
        let mut next_round = Instant::now() + interval;

        loop {
            let handled = coordinator
                .handle_shutdown(Actor::Loop, coordinator.poll_interval(), || async {
                    self.submit_round().await.map(|report| {
                        tracing::info!(accepted = report.accepted, "Final submission round");
                    })
                })
                .await?;
            if handled {
                tracing::info!("Submitter stopped");
                return Ok(());
            }

            if Instant::now() >= next_round {
                match self.submit_round().await {
                    Ok(report) if !report.is_empty() => tracing::info!(
                        accepted = report.accepted,
                        rejected = report.rejected,
                        "Batch submitted"
                    ),
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Submission round failed"),
                }
                next_round = Instant::now() + interval;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonce::{MemoryNonceStore, NonceStore, StoreResult};
    use crate::submission::message::ChainMessage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingSequencer {
        batches: std::sync::Mutex<Vec<(BatchId, Vec<(String, u64)>)>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Sequencer<ChainMessage> for RecordingSequencer {
        async fn submit(&self, batch_id: BatchId, messages: &[ChainMessage]) -> Result<(), SequencerError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SequencerError::Unavailable("down".into()));
            }
            let summary = messages.iter().map(|m| (m.sender.clone(), m.nonce)).collect();
            self.batches.lock().unwrap().push((batch_id, summary));
            Ok(())
        }
    }

    /// Memory store that fails every call after `healthy_calls` compare-and-sets.
    struct FlakyStore {
        inner: MemoryNonceStore,
        healthy_calls: std::sync::atomic::AtomicUsize,
        down: AtomicBool,
    }

    #[async_trait]
    impl NonceStore for FlakyStore {
        async fn load_floor(&self, key: &str) -> StoreResult<Option<u64>> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("flaky".into()));
            }
            self.inner.load_floor(key).await
        }

        async fn compare_and_set(&self, key: &str, expected: Option<u64>, new: u64) -> StoreResult<bool> {
            if self.healthy_calls.fetch_sub(1, Ordering::SeqCst) == 0 {
                self.down.store(true, Ordering::SeqCst);
            }
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("flaky".into()));
            }
            self.inner.compare_and_set(key, expected, new).await
        }
    }

    fn msg(sender: &str, nonce: u64) -> ChainMessage {
        ChainMessage::new(sender, nonce, 0, serde_json::Value::Null)
    }

    fn setup(store: Arc<dyn NonceStore>) -> (Arc<MessageBatcher<ChainMessage>>, Arc<RecordingSequencer>, Submitter<ChainMessage>) {
        let batcher = Arc::new(MessageBatcher::new(8));
        let guard = Arc::new(NonceGuard::new(store, "world").unwrap());
        let sequencer = Arc::new(RecordingSequencer::default());
        let submitter = Submitter::new(batcher.clone(), guard, sequencer.clone());
        (batcher, sequencer, submitter)
    }

    #[tokio::test]
    async fn test_round_drops_replays() {
        let (batcher, sequencer, submitter) = setup(Arc::new(MemoryNonceStore::new()));
        batcher.send([msg("a", 1), msg("b", 1), msg("a", 1), msg("a", 2)]);

        let report = submitter.submit_round().await.unwrap();
        assert_eq!(report.total, 4);
        assert_eq!(report.accepted, 3);
        assert_eq!(report.rejected, 1);

        let batches = sequencer.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(Some(batches[0].0), report.batch_id);
        assert_eq!(
            batches[0].1,
            vec![("a".to_string(), 1), ("b".to_string(), 1), ("a".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn test_empty_round_submits_nothing() {
        let (_batcher, sequencer, submitter) = setup(Arc::new(MemoryNonceStore::new()));
        let report = submitter.submit_round().await.unwrap();
        assert!(report.is_empty());
        assert!(report.batch_id.is_none());
        assert!(sequencer.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_all_replays_submits_nothing() {
        let (batcher, sequencer, submitter) = setup(Arc::new(MemoryNonceStore::new()));
        batcher.send([msg("a", 5)]);
        submitter.submit_round().await.unwrap();

        batcher.send([msg("a", 5), msg("a", 4)]);
        let report = submitter.submit_round().await.unwrap();
        assert_eq!(report.rejected, 2);
        assert_eq!(sequencer.batches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sequencer_failure_holds_batch() {
        let (batcher, sequencer, submitter) = setup(Arc::new(MemoryNonceStore::new()));
        sequencer.fail.store(true, Ordering::SeqCst);
        batcher.send([msg("a", 1), msg("a", 2)]);

        let err = submitter.submit_round().await.unwrap_err();
        assert!(matches!(err, SubmitError::Sequencer { .. }));
        assert_eq!(submitter.carried_over().await, 2);

        sequencer.fail.store(false, Ordering::SeqCst);
        batcher.send([msg("a", 3)]);
        submitter.submit_round().await.unwrap();

        let batches = sequencer.batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].1, vec![("a".to_string(), 1), ("a".to_string(), 2)]);
        assert_eq!(batches[1].1, vec![("a".to_string(), 3)]);
        drop(batches);
        assert_eq!(submitter.carried_over().await, 0);
    }

    #[tokio::test]
    async fn test_storage_fault_forwards_prefix_and_keeps_rest() {
        let store = Arc::new(FlakyStore {
            inner: MemoryNonceStore::new(),
            healthy_calls: std::sync::atomic::AtomicUsize::new(1),
            down: AtomicBool::new(false),
        });
        let (batcher, sequencer, submitter) = setup(store.clone());
        batcher.send([msg("a", 1), msg("b", 1), msg("c", 1)]);

        let err = submitter.submit_round().await.unwrap_err();
        assert!(matches!(err, SubmitError::Storage { .. }));
        assert_eq!(submitter.carried_over().await, 2);
        assert_eq!(sequencer.batches.lock().unwrap()[0].1, vec![("a".to_string(), 1)]);

        store.down.store(false, Ordering::SeqCst);
        store.healthy_calls.store(usize::MAX, Ordering::SeqCst);
        batcher.send([msg("d", 1)]);

        let report = submitter.submit_round().await.unwrap();
        assert_eq!(report.accepted, 3);
        assert_eq!(
            sequencer.batches.lock().unwrap()[1].1,
            vec![("b".to_string(), 1), ("c".to_string(), 1), ("d".to_string(), 1)]
        );
    }
}
