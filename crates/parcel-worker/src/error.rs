//! Error types for the worker.

use parcel_proto::CodecError;
use parcel_state::{BlobError, QueueError, StateError};
use thiserror::Error;

/// Failure of one entry-point invocation.
///
/// Captured function failures are not errors at this level; they are
/// recorded as outcomes. What remains is what the host must act on.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// A function asked for the message to be redelivered.
    #[error("function {function} requested a retry: {reason}")]
    RetryRequested { function: String, reason: String },

    /// Reading a proxied body or writing an outcome failed.
    #[error("blob store error: {0}")]
    Store(#[from] BlobError),

    #[error("failed to encode outcome: {0}")]
    Encode(#[source] CodecError),
}

impl HandlerError {
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::RetryRequested { .. })
    }
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration.
    #[error("Configuration error: {0}")]
    Parse(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Errors from the worker host.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build backends: {0}")]
    State(#[from] StateError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("failed to start metrics exporter: {0}")]
    Metrics(String),
}
