//! Two-phase shutdown handshake between the server and loop actors.
//!
//! # Protocol
//! ```text
//! initiator                          actor (server or loop)
//!     │                                   │
//!     │── request (carries ack slot) ────▶│ await_shutdown_signal()
//!     │                                   │ cleanup()
//!     │◀──────────────── acknowledge ─────│ acknowledge()
//!     ▼                                   ▼
//! request_shutdown() → true
//! ```
//!
//! # Design Decisions
//! - Every wait is bounded; a timeout is a `false`, never an error
//! - The acknowledgment slot travels with its request, so an ack can only
//!   reach the initiator that asked for it
//! - A request whose initiator already gave up is discarded on receipt
//! - Cleanup failure withholds the ack for both actors alike
//! - `shutdown_all` callers queue behind one lock; a failed attempt can be
//!   retried and resumes with the actor that has not yet acknowledged

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::time::{self, Instant};

use crate::config::validation::validate_shutdown;
use crate::config::{ConfigError, ShutdownConfig};
use crate::lifecycle::stage::{Stage, StageRegister};
use crate::observability::metrics::{self, HandshakeOutcome};

/// One of the two actors taking part in shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actor {
    /// The API/server loop.
    Server,
    /// The world tick loop.
    Loop,
}

impl Actor {
    pub fn as_str(self) -> &'static str {
        match self {
            Actor::Server => "server",
            Actor::Loop => "loop",
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the receiving side of a handshake.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// A shutdown request was received but the actor's cleanup failed.
    /// The acknowledgment was withheld.
    #[error("{actor} received a shutdown request but cleanup failed: {source}")]
    CleanupFailed {
        actor: Actor,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

type AckSlot = oneshot::Sender<()>;

/// Request and acknowledge channels for one actor.
struct SignalChannel {
    request_tx: mpsc::Sender<AckSlot>,
    request_rx: AsyncMutex<mpsc::Receiver<AckSlot>>,
    /// Ack for a request that has been received but not yet answered.
    pending_ack: Mutex<Option<AckSlot>>,
}

impl SignalChannel {
    fn new() -> Self {
        let (request_tx, request_rx) = mpsc::channel(1);
        Self {
            request_tx,
            request_rx: AsyncMutex::new(request_rx),
            pending_ack: Mutex::new(None),
        }
    }

    fn take_pending(&self) -> Option<AckSlot> {
        self.pending_ack
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn set_pending(&self, ack: AckSlot) {
        // Replacing an unanswered ack drops it, which releases its initiator.
        *self
            .pending_ack
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(ack);
    }
}

/// Handshakes already completed by earlier `shutdown_all` attempts.
#[derive(Debug, Default)]
struct Progress {
    server_stopped: bool,
}

struct Inner {
    server: SignalChannel,
    tick_loop: SignalChannel,
    stage: Arc<StageRegister>,
    server_budget: Duration,
    loop_budget: Duration,
    poll_interval: Duration,
    progress: AsyncMutex<Progress>,
}

/// Coordinator for the server/loop shutdown handshake.
///
/// Cheap to clone; every clone shares the same channels.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    /// Build a coordinator that records terminal stages in `stage`.
    ///
    /// Fails only if the handshake configuration is malformed.
    pub fn new(config: &ShutdownConfig, stage: Arc<StageRegister>) -> Result<Self, ConfigError> {
        let mut errors = Vec::new();
        validate_shutdown(config, &mut errors);
        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors));
        }

        Ok(Self {
            inner: Arc::new(Inner {
                server: SignalChannel::new(),
                tick_loop: SignalChannel::new(),
                stage,
                server_budget: config.server_timeout(),
                loop_budget: config.loop_timeout(),
                poll_interval: config.poll_interval(),
                progress: AsyncMutex::new(Progress::default()),
            }),
        })
    }

    /// How long actors should wait for a request on each poll.
    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    /// The stage register this coordinator drives.
    pub fn stage(&self) -> &Arc<StageRegister> {
        &self.inner.stage
    }

    fn channel(&self, actor: Actor) -> &SignalChannel {
        match actor {
            Actor::Server => &self.inner.server,
            Actor::Loop => &self.inner.tick_loop,
        }
    }

    /// Ask `actor` to shut down and wait for its acknowledgment.
    ///
    /// Returns `true` if the actor acknowledged within `timeout`. Returns
    /// `false` if the wait expired or the actor withheld its ack.
    pub async fn request_shutdown(&self, actor: Actor, timeout: Duration) -> bool {
        let channel = self.channel(actor);
        let (ack_tx, ack_rx) = oneshot::channel();

        tracing::info!(actor = %actor, timeout_ms = timeout.as_millis() as u64, "Requesting shutdown");

        let handshake = async {
            if channel.request_tx.send(ack_tx).await.is_err() {
                return false;
            }
            ack_rx.await.is_ok()
        };

        match time::timeout(timeout, handshake).await {
            Ok(true) => {
                tracing::info!(actor = %actor, "Shutdown acknowledged");
                metrics::record_handshake(actor.as_str(), HandshakeOutcome::Acked);
                true
            }
            Ok(false) => {
                tracing::debug!(actor = %actor, "Shutdown request was not acknowledged");
                metrics::record_handshake(actor.as_str(), HandshakeOutcome::CleanupFailed);
                false
            }
            Err(_) => {
                tracing::debug!(actor = %actor, "Timed out waiting for shutdown acknowledgment");
                metrics::record_handshake(actor.as_str(), HandshakeOutcome::TimedOut);
                false
            }
        }
    }

    /// Wait up to `timeout` for a shutdown request addressed to `actor`.
    ///
    /// On `true` the request is held until [`acknowledge`](Self::acknowledge)
    /// is called. Intended to be polled, e.g. once per tick.
    pub async fn await_shutdown_signal(&self, actor: Actor, timeout: Duration) -> bool {
        let channel = self.channel(actor);
        let deadline = Instant::now() + timeout;

        let mut requests = match time::timeout_at(deadline, channel.request_rx.lock()).await {
            Ok(guard) => guard,
            Err(_) => return false,
        };

        loop {
            match time::timeout_at(deadline, requests.recv()).await {
                Ok(Some(ack)) if ack.is_closed() => {
                    tracing::debug!(actor = %actor, "Discarding stale shutdown request");
                }
                Ok(Some(ack)) => {
                    channel.set_pending(ack);
                    return true;
                }
                // The coordinator owns a sender, so the channel never closes.
                Ok(None) | Err(_) => return false,
            }
        }
    }

    /// Acknowledge the request last received by `actor`.
    ///
    /// Returns `false` if there was no pending request or its initiator
    /// stopped waiting.
    pub fn acknowledge(&self, actor: Actor) -> bool {
        match self.channel(actor).take_pending() {
            Some(ack) => ack.send(()).is_ok(),
            None => false,
        }
    }

    /// Wait for a request, run `cleanup`, then acknowledge.
    ///
    /// - `Ok(false)`: no request arrived within `wait`
    /// - `Ok(true)`: a request arrived and cleanup succeeded
    /// - `Err(CleanupFailed)`: a request arrived and cleanup failed; the
    ///   initiator is released with `false`
    pub async fn handle_shutdown<F, Fut, E>(
        &self,
        actor: Actor,
        wait: Duration,
        cleanup: F,
    ) -> Result<bool, ShutdownError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        if !self.await_shutdown_signal(actor, wait).await {
            return Ok(false);
        }

        tracing::info!(actor = %actor, "Shutdown signal received, running cleanup");

        if let Err(e) = cleanup().await {
            drop(self.channel(actor).take_pending());
            let source = e.into();
            tracing::error!(actor = %actor, error = %source, "Shutdown cleanup failed");
            return Err(ShutdownError::CleanupFailed { actor, source });
        }

        if !self.acknowledge(actor) {
            tracing::debug!(actor = %actor, "Initiator stopped waiting before cleanup finished");
        }
        Ok(true)
    }

    /// Shut down the server actor, then the loop actor.
    ///
    /// Stores `ShuttingDown` from whatever stage the process is in, then
    /// runs both handshakes within their budgets. The stage becomes
    /// `ShutDown` only when both actors acknowledged; on failure it stays
    /// `ShuttingDown` and the call may be retried. A retry skips the server
    /// if it already acknowledged.
    ///
    /// Concurrent callers are served one at a time. A caller that finds the
    /// stage already `ShutDown` returns `true` without sending requests.
    pub async fn shutdown_all(&self) -> bool {
        let mut progress = self.inner.progress.lock().await;

        if self.inner.stage.load() == Stage::ShutDown {
            return true;
        }

        let previous = self.inner.stage.swap(Stage::ShuttingDown);
        if previous != Stage::ShuttingDown {
            tracing::info!(from = %previous, "Shutting down");
        }

        if !progress.server_stopped {
            if !self
                .request_shutdown(Actor::Server, self.inner.server_budget)
                .await
            {
                return false;
            }
            progress.server_stopped = true;
        }

        if !self
            .request_shutdown(Actor::Loop, self.inner.loop_budget)
            .await
        {
            return false;
        }

        self.inner.stage.store(Stage::ShutDown);
        tracing::info!("Shutdown complete");
        true
    }
}

impl fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("stage", &self.inner.stage.load())
            .field("server_budget", &self.inner.server_budget)
            .field("loop_budget", &self.inner.loop_budget)
            .finish()
    }
}
