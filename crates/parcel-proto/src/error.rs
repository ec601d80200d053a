//! Error types for the wire format.

use parcel_state::BlobError;
use thiserror::Error;

/// Codec errors.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The payload is not valid JSON or not the expected shape.
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    /// A value could not be encoded as JSON.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// The payload decoded, but to something other than a JSON object.
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// Reading or writing a proxied body failed.
    #[error("proxy storage error: {0}")]
    Store(#[from] BlobError),
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
