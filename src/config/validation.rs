//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Reject namespaces that would collide with the key separator
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function over the config
//! - Section validators are reused by component constructors

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{NonceConfig, ShutdownConfig, WorldsyncConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a full configuration.
pub fn validate_config(config: &WorldsyncConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_shutdown(&config.shutdown, &mut errors);
    validate_nonce(&config.nonce, &mut errors);

    if config.submission.interval_ms == 0 {
        errors.push(ValidationError::new(
            "submission.interval_ms",
            "must be greater than zero",
        ));
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn validate_shutdown(config: &ShutdownConfig, errors: &mut Vec<ValidationError>) {
    if config.server_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "shutdown.server_timeout_secs",
            "must be greater than zero",
        ));
    }
    if config.loop_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "shutdown.loop_timeout_secs",
            "must be greater than zero",
        ));
    }
    if config.poll_interval_ms == 0 {
        errors.push(ValidationError::new(
            "shutdown.poll_interval_ms",
            "must be greater than zero",
        ));
    } else {
        // An actor polling slower than the initiator waits can never acknowledge in time.
        let shortest = config.server_timeout().min(config.loop_timeout());
        if !shortest.is_zero() && config.poll_interval() >= shortest {
            errors.push(ValidationError::new(
                "shutdown.poll_interval_ms",
                "must be shorter than both handshake timeouts",
            ));
        }
    }
}

pub fn validate_nonce(config: &NonceConfig, errors: &mut Vec<ValidationError>) {
    validate_namespace(&config.namespace, errors);
    if config.store_path.trim().is_empty() {
        errors.push(ValidationError::new("nonce.store_path", "must not be empty"));
    }
}

pub fn validate_namespace(namespace: &str, errors: &mut Vec<ValidationError>) {
    if namespace.is_empty() {
        errors.push(ValidationError::new("nonce.namespace", "must not be empty"));
    } else if namespace.contains(':') {
        errors.push(ValidationError::new(
            "nonce.namespace",
            "must not contain ':'",
        ));
    }
}
