//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define coordination metrics (stage, handshakes, batches, nonce checks)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `worldsync_stage` (gauge): current stage ordinal
//! - `worldsync_stage_transitions_total` (counter): by `from`, `to`
//! - `worldsync_handshakes_total` (counter): by `actor`, `outcome`
//! - `worldsync_batch_size` (histogram): messages per non-empty drain
//! - `worldsync_messages_drained_total` (counter)
//! - `worldsync_nonce_checks_total` (counter): by `outcome`
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Label values are static strings to keep cardinality bounded

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::lifecycle::Stage;

/// Install the Prometheus recorder and HTTP scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_stage(stage: Stage) {
    ::metrics::gauge!("worldsync_stage").set(f64::from(stage.as_u8()));
}

pub fn record_stage_transition(from: Stage, to: Stage) {
    ::metrics::counter!(
        "worldsync_stage_transitions_total",
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Outcome of one shutdown handshake, seen from either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Acked,
    TimedOut,
    CleanupFailed,
}

impl HandshakeOutcome {
    fn as_str(self) -> &'static str {
        match self {
            HandshakeOutcome::Acked => "acked",
            HandshakeOutcome::TimedOut => "timed_out",
            HandshakeOutcome::CleanupFailed => "cleanup_failed",
        }
    }
}

pub fn record_handshake(actor: &'static str, outcome: HandshakeOutcome) {
    ::metrics::counter!(
        "worldsync_handshakes_total",
        "actor" => actor,
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

pub fn record_drain(count: usize) {
    if count == 0 {
        return;
    }
    ::metrics::histogram!("worldsync_batch_size").record(count as f64);
    ::metrics::counter!("worldsync_messages_drained_total").increment(count as u64);
}

pub fn record_nonce_check(outcome: &'static str) {
    ::metrics::counter!("worldsync_nonce_checks_total", "outcome" => outcome).increment(1);
}
