use std::fmt;
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message claimed from a queue.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub body: Vec<u8>,
    /// Number of times this message has been delivered, including this one.
    pub attempt: u32,
    pub enqueued_at: SystemTime,
}

impl Message {
    pub fn new(id: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            id: MessageId::new(id),
            body,
            attempt: 1,
            enqueued_at: SystemTime::now(),
        }
    }

    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
