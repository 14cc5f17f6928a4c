//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Every field has a default so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for a worldsync host process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WorldsyncConfig {
    /// Shutdown handshake budgets.
    pub shutdown: ShutdownConfig,

    /// Outbound message queue sizing.
    pub batcher: BatcherConfig,

    /// Replay protection store.
    pub nonce: NonceConfig,

    /// Sequencer submission cadence.
    pub submission: SubmissionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Shutdown handshake configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for the server actor to acknowledge, in seconds.
    pub server_timeout_secs: u64,

    /// How long to wait for the loop actor to acknowledge, in seconds.
    pub loop_timeout_secs: u64,

    /// How long an actor waits for a request on each poll, in milliseconds.
    pub poll_interval_ms: u64,
}

impl ShutdownConfig {
    pub fn server_timeout(&self) -> Duration {
        Duration::from_secs(self.server_timeout_secs)
    }

    pub fn loop_timeout(&self) -> Duration {
        Duration::from_secs(self.loop_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            server_timeout_secs: 5,
            loop_timeout_secs: 5,
            poll_interval_ms: 100,
        }
    }
}

/// Message batcher configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Pre-sized storage for each fresh queue. Not a bound.
    pub initial_capacity: usize,

    /// Upper bound enforced by `try_send` (0 = unbounded).
    pub max_pending: usize,
}

impl BatcherConfig {
    /// The enforced limit, if any.
    pub fn limit(&self) -> Option<usize> {
        (self.max_pending > 0).then_some(self.max_pending)
    }
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 256,
            max_pending: 0,
        }
    }
}

/// Nonce store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NonceConfig {
    /// Key prefix separating deployments that share one store.
    pub namespace: String,

    /// Location of the durable nonce file.
    pub store_path: String,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            namespace: "world".to_string(),
            store_path: "data/nonces.json".to_string(),
        }
    }
}

/// Submission loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Interval between drain-and-submit rounds in milliseconds.
    pub interval_ms: u64,
}

impl SubmissionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines instead of the human-readable format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
