//! Queue consumer driving the handler.
//!
//! Each receive becomes one invocation with its own deadline. The whole
//! batch is acknowledged when the invocation succeeds and released for
//! redelivery when it fails, times out or a function asks for a retry.

use std::string::FromUtf8Error;
use std::sync::Arc;

use parcel_proto::QueueRecord;
use parcel_state::{Message, QueueBackend};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConsumerSettings;
use crate::context::InvocationContext;
use crate::error::WorkerError;
use crate::handler::Handler;

pub struct Consumer {
    handler: Arc<Handler>,
    queue: Arc<dyn QueueBackend>,
    queue_name: String,
    worker_name: String,
    settings: ConsumerSettings,
}

impl Consumer {
    pub fn new(
        handler: Arc<Handler>,
        queue: Arc<dyn QueueBackend>,
        queue_name: impl Into<String>,
        worker_name: impl Into<String>,
        settings: ConsumerSettings,
    ) -> Self {
        if !settings.lease_covers_invocation() {
            warn!(
                visibility_timeout_secs = settings.visibility_timeout_secs,
                invocation_timeout_secs = settings.invocation_timeout_secs,
                "visibility timeout is shorter than the invocation timeout; \
                 long batches may be redelivered while still running"
            );
        }
        Self {
            handler,
            queue,
            queue_name: queue_name.into(),
            worker_name: worker_name.into(),
            settings,
        }
    }

    /// Run the consumer loop until the cancellation token is triggered.
    ///
    /// A batch in progress is finished before the loop exits.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            queue = %self.queue_name,
            worker = %self.worker_name,
            batch_size = self.settings.batch_size,
            "consumer started"
        );

        while !cancel.is_cancelled() {
            let idle = match self.poll_once().await {
                Ok(0) => true,
                Ok(_) => false,
                Err(e) => {
                    error!(queue = %self.queue_name, error = %e, "failed to poll queue");
                    true
                }
            };

            if idle {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(self.settings.poll_interval()) => {}
                }
            }
        }

        info!(queue = %self.queue_name, "consumer stopped");
    }

    /// Receive and process at most one batch. Returns the number of
    /// messages received.
    pub async fn poll_once(&self) -> Result<usize, WorkerError> {
        let messages = self
            .queue
            .receive_batch(
                &self.queue_name,
                self.settings.batch_size,
                self.settings.visibility_timeout(),
            )
            .await?;

        if messages.is_empty() {
            return Ok(0);
        }

        let count = messages.len();
        self.process(messages).await?;
        Ok(count)
    }

    async fn process(&self, messages: Vec<Message>) -> Result<(), WorkerError> {
        let budget = self.settings.invocation_timeout();
        let ctx = InvocationContext::new(self.worker_name.clone(), budget);
        let mut records = Vec::with_capacity(messages.len());
        let mut undecodable = Vec::new();
        for message in &messages {
            match to_record(message) {
                Ok(record) => records.push(record),
                Err(e) => {
                    error!(
                        queue = %self.queue_name,
                        message_id = %message.id,
                        error = %e,
                        "dropping message with a non UTF-8 body"
                    );
                    undecodable.push(&message.id);
                }
            }
        }

        debug!(queue = %self.queue_name, messages = messages.len(), "received batch");

        let succeeded =
            match tokio::time::timeout(budget, self.handler.handle_batch(records, &ctx)).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) if e.is_retry() => {
                    warn!(queue = %self.queue_name, error = %e, "releasing batch for redelivery");
                    false
                }
                Ok(Err(e)) => {
                    error!(queue = %self.queue_name, error = %e, "batch failed");
                    false
                }
                Err(_) => {
                    error!(
                        queue = %self.queue_name,
                        timeout_secs = budget.as_secs(),
                        "batch exceeded invocation timeout"
                    );
                    false
                }
            };

        for message in &messages {
            if succeeded || undecodable.contains(&&message.id) {
                self.queue.ack(&self.queue_name, &message.id).await?;
            } else {
                self.queue.nack(&self.queue_name, &message.id).await?;
            }
        }
        Ok(())
    }
}

/// Queue bodies are JSON text; anything that is not UTF-8 can never decode.
fn to_record(message: &Message) -> Result<QueueRecord, FromUtf8Error> {
    let body = String::from_utf8(message.body.clone())?;
    Ok(QueueRecord::new(body).with_message_id(message.id.as_str()))
}
