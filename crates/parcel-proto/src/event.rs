//! Batch-of-records events delivered by the queue transport.

use serde::{Deserialize, Serialize};

/// Key marking a [`BatchEvent`].
pub const RECORDS_FIELD: &str = "Records";

/// `{"Records": [{"body": "..."}, ...]}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEvent {
    #[serde(rename = "Records")]
    pub records: Vec<QueueRecord>,
}

/// One queue message inside a [`BatchEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRecord {
    #[serde(
        rename = "messageId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub message_id: Option<String>,

    /// JSON text of a call message or proxy envelope.
    pub body: String,
}

impl QueueRecord {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            message_id: None,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }
}

impl BatchEvent {
    pub fn new(records: Vec<QueueRecord>) -> Self {
        Self { records }
    }
}
