//! Many-producer, single-consumer message accumulation.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::config::BatcherConfig;
use crate::observability::metrics;

/// Errors from the bounded send path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// Accepting the messages would exceed the configured limit.
    #[error("queue full: {pending} pending + {incoming} incoming exceeds limit {limit}")]
    QueueFull {
        pending: usize,
        incoming: usize,
        limit: usize,
    },
}

/// Queue of outbound messages drained in whole batches.
///
/// Every sent message appears in exactly one [`drain`](Self::drain), in
/// send order, with each `send` call's messages kept contiguous.
pub struct MessageBatcher<M> {
    queue: Mutex<Vec<M>>,
    capacity: usize,
    limit: Option<usize>,
}

impl<M> MessageBatcher<M> {
    /// Create a batcher whose queues are pre-sized to `capacity`.
    ///
    /// `capacity` is a hint only; `send` never rejects.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            limit: None,
        }
    }

    /// Create a batcher whose [`try_send`](Self::try_send) rejects once
    /// `max_pending` messages are waiting.
    pub fn with_limit(capacity: usize, max_pending: usize) -> Self {
        Self {
            limit: Some(max_pending),
            ..Self::new(capacity)
        }
    }

    /// Build a batcher from configuration.
    pub fn from_config(config: &BatcherConfig) -> Self {
        match config.limit() {
            Some(limit) => Self::with_limit(config.initial_capacity, limit),
            None => Self::new(config.initial_capacity),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<M>> {
        // A panicking producer cannot leave the Vec half-extended.
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append messages in the order given.
    pub fn send<I>(&self, messages: I)
    where
        I: IntoIterator<Item = M>,
    {
        self.lock().extend(messages);
    }

    /// Append messages unless that would exceed the configured limit.
    ///
    /// The whole call is rejected or accepted; without a limit this never fails.
    pub fn try_send(&self, messages: Vec<M>) -> Result<(), BatchError> {
        let mut queue = self.lock();
        if let Some(limit) = self.limit {
            if queue.len() + messages.len() > limit {
                return Err(BatchError::QueueFull {
                    pending: queue.len(),
                    incoming: messages.len(),
                    limit,
                });
            }
        }
        queue.extend(messages);
        Ok(())
    }

    /// Detach and return everything sent so far.
    pub fn drain(&self) -> Vec<M> {
        let fresh = Vec::with_capacity(self.capacity);
        let batch = std::mem::replace(&mut *self.lock(), fresh);
        metrics::record_drain(batch.len());
        batch
    }

    /// Number of messages waiting for the next drain.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity_hint(&self) -> usize {
        self.capacity
    }
}

impl<M> fmt::Debug for MessageBatcher<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBatcher")
            .field("pending", &self.len())
            .field("capacity", &self.capacity)
            .field("limit", &self.limit)
            .finish()
    }
}
