//! Error types for dispatching calls and waiting on results.

use std::time::Duration;

use parcel_proto::CodecError;
use parcel_state::{BlobError, QueueError, StateError};
use thiserror::Error;

/// Failure to hand a call to the queue.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("failed to build message: {0}")]
    Codec(#[from] CodecError),

    #[error("failed to send message: {0}")]
    Queue(#[from] QueueError),
}

/// Failure to obtain the outcome of a call.
#[derive(Error, Debug)]
pub enum ResultError {
    /// The outcome did not appear within the polling budget.
    #[error("Result {key} not found within {secs} seconds", secs = .budget.as_secs_f64())]
    Timeout { key: String, budget: Duration },

    /// The blob store failed with something other than not-found.
    #[error("failed to fetch result: {0}")]
    Store(#[from] BlobError),

    #[error("failed to decode result: {0}")]
    Decode(#[from] CodecError),

    /// The remote function failed; the message is its captured exception.
    #[error("{exception}")]
    Remote { exception: String, traceback: String },

    /// `*_blocking` was called on a current-thread Tokio runtime.
    #[error("blocking wait called from within an async runtime; use the async variant")]
    BlockingInRuntime,

    #[error("failed to start runtime for blocking wait: {0}")]
    Runtime(#[source] std::io::Error),
}

impl ResultError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Client configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Figment(Box<figment::Error>),

    /// No queue is configured for the named service.
    #[error("no queue configured for service {service} (set {var})")]
    MissingService { service: String, var: String },

    #[error("failed to build backends: {0}")]
    State(#[from] StateError),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}
