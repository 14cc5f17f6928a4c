//! Per-sender replay protection.

use std::sync::Arc;

use thiserror::Error;

use crate::config::validation::validate_namespace;
use crate::config::ConfigError;
use crate::nonce::store::{NonceStore, StoreError};
use crate::observability::metrics;

/// Errors returned by [`NonceGuard::use_nonce`].
#[derive(Debug, Error)]
pub enum NonceError {
    /// The nonce is not above the sender's high-water mark.
    #[error("nonce {nonce} already used by {sender} (highest accepted: {floor})")]
    AlreadyUsed {
        sender: String,
        nonce: u64,
        floor: u64,
    },

    /// The store failed; the nonce was neither accepted nor rejected.
    #[error(transparent)]
    StorageUnavailable(#[from] StoreError),
}

impl NonceError {
    /// Whether this is a replay rejection rather than an infrastructure fault.
    pub fn is_replay(&self) -> bool {
        matches!(self, NonceError::AlreadyUsed { .. })
    }
}

/// Result type for nonce checks.
pub type NonceResult<T> = Result<T, NonceError>;

/// Gate accepting each sender's nonces only in strictly increasing order.
///
/// No state is cached between calls; every check reads the store.
pub struct NonceGuard {
    store: Arc<dyn NonceStore>,
    namespace: String,
}

impl NonceGuard {
    /// Create a guard whose keys are prefixed with `namespace`.
    pub fn new(store: Arc<dyn NonceStore>, namespace: impl Into<String>) -> Result<Self, ConfigError> {
        let namespace = namespace.into();
        let mut errors = Vec::new();
        validate_namespace(&namespace, &mut errors);
        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors));
        }
        Ok(Self { store, namespace })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, sender: &str) -> String {
        format!("{}:{}", self.namespace, sender)
    }

    /// Accept `nonce` for `sender` if it is above every nonce accepted before.
    ///
    /// On success the new high-water mark is durable. A rejected call
    /// changes nothing.
    pub async fn use_nonce(&self, sender: &str, nonce: u64) -> NonceResult<()> {
        let key = self.key(sender);

        let result = self.advance(&key, sender, nonce).await;
        match &result {
            Ok(()) => {
                metrics::record_nonce_check("accepted");
            }
            Err(NonceError::AlreadyUsed { floor, .. }) => {
                tracing::debug!(sender = %sender, nonce, floor, "Nonce rejected as replay");
                metrics::record_nonce_check("replayed");
            }
            Err(NonceError::StorageUnavailable(_)) => {
                metrics::record_nonce_check("storage_error");
            }
        }
        result
    }

    async fn advance(&self, key: &str, sender: &str, nonce: u64) -> NonceResult<()> {
        loop {
            let floor = self.store.load_floor(key).await?;
            if let Some(floor) = floor {
                if nonce <= floor {
                    return Err(NonceError::AlreadyUsed {
                        sender: sender.to_string(),
                        nonce,
                        floor,
                    });
                }
            }

            if self.store.compare_and_set(key, floor, nonce).await? {
                return Ok(());
            }
            // Another caller moved the floor between our read and write; re-check.
        }
    }

    /// Highest nonce accepted so far for `sender`.
    pub async fn current_floor(&self, sender: &str) -> NonceResult<Option<u64>> {
        Ok(self.store.load_floor(&self.key(sender)).await?)
    }
}

impl std::fmt::Debug for NonceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceGuard")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
