use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("No such key: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl BlobError {
    pub fn not_found(bucket: &str, key: &str) -> Self {
        Self::NotFound {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        }
    }

    /// True for the one failure a result poller is allowed to retry on.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("The {0} backend is not compiled into this build")]
    BackendDisabled(&'static str),

    #[error("Connection error: {0}")]
    Connection(String),
}
