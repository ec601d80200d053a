use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{BlobError, QueueError};
use crate::traits::{BlobStore, QueueBackend, MAX_QUEUE_MESSAGE_SIZE};
use crate::types::{Message, MessageId};

#[derive(Debug, Default)]
struct BlobCounters {
    gets: AtomicUsize,
    puts: AtomicUsize,
}

/// In-process blob store keyed by `(bucket, key)`.
///
/// Clones share the same data. Request counters are kept so callers can
/// observe how often the store was consulted.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    data: Arc<RwLock<HashMap<(String, String), Vec<u8>>>>,
    counters: Arc<BlobCounters>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get` calls served so far, including misses.
    pub fn get_count(&self) -> usize {
        self.counters.gets.load(Ordering::SeqCst)
    }

    pub fn put_count(&self) -> usize {
        self.counters.puts.load(Ordering::SeqCst)
    }

    /// Keys currently stored in `bucket` that start with `prefix`, sorted.
    pub async fn keys(&self, bucket: &str, prefix: &str) -> Vec<String> {
        let data = self.data.read().await;
        let mut keys: Vec<String> = data
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobError> {
        self.counters.gets.fetch_add(1, Ordering::SeqCst);
        let data = self.data.read().await;
        data.get(&(bucket.to_owned(), key.to_owned()))
            .cloned()
            .ok_or_else(|| BlobError::not_found(bucket, key))
    }

    async fn put(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), BlobError> {
        if key.is_empty() {
            return Err(BlobError::InvalidKey("key must not be empty".to_owned()));
        }
        self.counters.puts.fetch_add(1, Ordering::SeqCst);
        let mut data = self.data.write().await;
        data.insert((bucket.to_owned(), key.to_owned()), body.to_vec());
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<bool, BlobError> {
        let mut data = self.data.write().await;
        Ok(data.remove(&(bucket.to_owned(), key.to_owned())).is_some())
    }
}

/// A received message that is hidden from other receivers until `expires`.
#[derive(Debug)]
struct Lease {
    seq: u64,
    message: Message,
    expires: Instant,
}

#[derive(Debug, Default)]
struct Lane {
    next_seq: u64,
    ready: VecDeque<(u64, Message)>,
    leased: HashMap<MessageId, Lease>,
}

impl Lane {
    /// Puts a message back into the ready list, keeping send order.
    fn release(&mut self, seq: u64, message: Message) {
        let at = self.ready.partition_point(|(s, _)| *s < seq);
        self.ready.insert(at, (seq, message));
    }

    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<MessageId> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.expires <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some(lease) = self.leased.remove(&id) {
                self.release(lease.seq, lease.message);
            }
        }
    }
}

/// In-process queue with visibility timeouts.
///
/// Received messages are leased; they come back when the lease runs out or
/// on `nack`, and are dropped on `ack`.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    lanes: Arc<Mutex<HashMap<String, Lane>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages held for `queue`, leased or not.
    pub async fn len(&self, queue: &str) -> usize {
        let lanes = self.lanes.lock().await;
        lanes
            .get(queue)
            .map_or(0, |lane| lane.ready.len() + lane.leased.len())
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn send(&self, queue: &str, body: &[u8]) -> Result<MessageId, QueueError> {
        if body.len() > MAX_QUEUE_MESSAGE_SIZE {
            return Err(QueueError::MessageTooLarge {
                size: body.len(),
                max: MAX_QUEUE_MESSAGE_SIZE,
            });
        }

        let id = MessageId::new(Uuid::new_v4().to_string());
        let message = Message {
            id: id.clone(),
            body: body.to_vec(),
            attempt: 0,
            enqueued_at: SystemTime::now(),
        };

        let mut lanes = self.lanes.lock().await;
        let lane = lanes.entry(queue.to_owned()).or_default();
        let seq = lane.next_seq;
        lane.next_seq += 1;
        lane.ready.push_back((seq, message));

        Ok(id)
    }

    async fn receive_batch(
        &self,
        queue: &str,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<Message>, QueueError> {
        let mut lanes = self.lanes.lock().await;
        let Some(lane) = lanes.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let now = Instant::now();
        lane.reclaim_expired(now);

        let Lane { ready, leased, .. } = lane;
        let take = max.min(ready.len());
        let batch: Vec<Message> = ready
            .drain(..take)
            .map(|(seq, mut message)| {
                message.attempt += 1;
                leased.insert(
                    message.id.clone(),
                    Lease {
                        seq,
                        message: message.clone(),
                        expires: now + visibility_timeout,
                    },
                );
                message
            })
            .collect();

        Ok(batch)
    }

    async fn ack(&self, queue: &str, message_id: &MessageId) -> Result<(), QueueError> {
        let mut lanes = self.lanes.lock().await;
        let lane = lanes
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_owned()))?;

        if lane.leased.remove(message_id).is_some() {
            return Ok(());
        }
        match lane.ready.iter().position(|(_, m)| m.id == *message_id) {
            Some(at) => {
                lane.ready.remove(at);
                Ok(())
            }
            None => Err(QueueError::MessageNotFound(message_id.to_string())),
        }
    }

    async fn nack(&self, queue: &str, message_id: &MessageId) -> Result<(), QueueError> {
        let mut lanes = self.lanes.lock().await;
        let lane = lanes
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_owned()))?;

        if let Some(lease) = lane.leased.remove(message_id) {
            lane.release(lease.seq, lease.message);
            return Ok(());
        }
        if lane.ready.iter().any(|(_, m)| m.id == *message_id) {
            return Ok(());
        }
        Err(QueueError::MessageNotFound(message_id.to_string()))
    }
}
