//! Result of dispatching one call.

use std::fmt;

use crate::function::{FunctionError, Reply};

/// What happened when a call was dispatched.
pub enum Outcome {
    Success(Box<dyn Reply>),
    Failure(Failure),
    /// The function asked for redelivery. Never recorded, never absorbed.
    RetryRequested { reason: String },
}

impl Outcome {
    pub fn success<R: Reply + 'static>(reply: R) -> Self {
        Self::Success(Box::new(reply))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Failure(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<FunctionError> for Outcome {
    fn from(err: FunctionError) -> Self {
        match err {
            FunctionError::Failed {
                kind,
                message,
                trace,
            } => Self::Failure(Failure {
                kind,
                message,
                trace,
            }),
            FunctionError::Retry { reason } => Self::RetryRequested { reason },
        }
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(reply) => f
                .debug_tuple("Success")
                .field(&reply.to_json().map_err(|e| e.to_string()))
                .finish(),
            Self::Failure(failure) => f.debug_tuple("Failure").field(failure).finish(),
            Self::RetryRequested { reason } => f
                .debug_struct("RetryRequested")
                .field("reason", reason)
                .finish(),
        }
    }
}

/// A captured failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Error kind, usually the error's type name.
    pub kind: String,
    pub message: String,
    pub trace: String,
}

impl Failure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: String::new(),
        }
    }

    #[must_use]
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = trace.into();
        self
    }

    /// One-line description stored as the outcome's `exception`,
    /// e.g. `ValueError("x")`.
    pub fn repr(&self) -> String {
        format!("{}({:?})", self.kind, self.message)
    }

    /// The stored `traceback`: the trace if one was captured, else the
    /// description itself.
    pub fn traceback(&self) -> String {
        if self.trace.is_empty() {
            format!("{}: {}\n", self.kind, self.message)
        } else {
            format!("{}: {}\n{}", self.kind, self.message, self.trace)
        }
    }
}
