use std::time::Duration;

use async_trait::async_trait;

use crate::error::{BlobError, QueueError};
use crate::types::{Message, MessageId};

/// Largest message body a queue accepts, in bytes.
pub const MAX_QUEUE_MESSAGE_SIZE: usize = 262_144;

/// Object storage addressed by bucket and key.
///
/// `get` fails with [`BlobError::NotFound`] when the key is absent; every
/// other error means the store itself could not answer.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobError>;

    async fn put(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), BlobError>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<bool, BlobError>;
}

#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn send(&self, queue: &str, body: &[u8]) -> Result<MessageId, QueueError>;

    /// Claims up to `max` visible messages, hiding them for `visibility_timeout`.
    async fn receive_batch(
        &self,
        queue: &str,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<Message>, QueueError>;

    async fn ack(&self, queue: &str, message_id: &MessageId) -> Result<(), QueueError>;

    async fn nack(&self, queue: &str, message_id: &MessageId) -> Result<(), QueueError>;
}
