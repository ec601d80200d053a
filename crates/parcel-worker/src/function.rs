//! What registered functions receive and return.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::fmt::Write as _;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Kind reported for argument binding failures.
pub const ARGUMENT_ERROR: &str = "ArgumentError";

/// Positional and keyword arguments of one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl CallArgs {
    pub fn new(args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self { args, kwargs }
    }

    /// Bind a required parameter, by position first and then by name.
    pub fn arg<T: DeserializeOwned>(&self, index: usize, name: &str) -> Result<T, FunctionError> {
        self.optional(index, name)?.ok_or_else(|| {
            FunctionError::new(
                ARGUMENT_ERROR,
                format!("missing required argument '{name}' (position {index})"),
            )
        })
    }

    /// Bind a parameter that may be left out.
    pub fn optional<T: DeserializeOwned>(
        &self,
        index: usize,
        name: &str,
    ) -> Result<Option<T>, FunctionError> {
        let value = match (self.args.get(index), self.kwargs.get(name)) {
            (Some(_), Some(_)) => {
                return Err(FunctionError::new(
                    ARGUMENT_ERROR,
                    format!("got multiple values for argument '{name}'"),
                ))
            }
            (Some(v), None) | (None, Some(v)) => v,
            (None, None) => return Ok(None),
        };

        T::deserialize(value).map(Some).map_err(|e| {
            FunctionError::new(ARGUMENT_ERROR, format!("invalid argument '{name}': {e}"))
        })
    }

    /// Fail if more positional arguments were passed than the function takes.
    pub fn expect_at_most(&self, count: usize) -> Result<(), FunctionError> {
        if self.args.len() > count {
            return Err(FunctionError::new(
                ARGUMENT_ERROR,
                format!(
                    "takes {count} positional arguments but {} were given",
                    self.args.len()
                ),
            ));
        }
        Ok(())
    }
}

/// A function return value that can be recorded as JSON.
///
/// Implemented for every thread-safe `Serialize` type. Conversion happens when the
/// outcome is recorded, so a value that fails to serialize is reported as a
/// failure outcome rather than lost.
pub trait Reply: Send + Sync {
    fn to_json(&self) -> Result<Value, serde_json::Error>;
}

impl<T: Serialize + Send + Sync> Reply for T {
    fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// How a registered function fails.
///
/// Any error type converts into [`FunctionError::Failed`] with `?`, taking
/// its type name as the kind. Does not implement `std::error::Error` itself,
/// which is what makes the blanket conversion possible.
pub enum FunctionError {
    Failed {
        kind: String,
        message: String,
        /// Source chain and backtrace, captured at conversion.
        trace: String,
    },
    /// Leave the message on the queue for redelivery instead of recording
    /// an outcome.
    Retry { reason: String },
}

impl FunctionError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            kind: kind.into(),
            message: message.into(),
            trace: captured_backtrace(),
        }
    }

    pub fn msg(message: impl Into<String>) -> Self {
        Self::new("Error", message)
    }

    pub fn retry(reason: impl Into<String>) -> Self {
        Self::Retry {
            reason: reason.into(),
        }
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }
}

impl<E> From<E> for FunctionError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        let mut trace = String::new();
        let mut source = err.source();
        while let Some(cause) = source {
            let _ = writeln!(trace, "caused by: {cause}");
            source = cause.source();
        }
        trace.push_str(&captured_backtrace());

        Self::Failed {
            kind: short_type_name::<E>().to_owned(),
            message: err.to_string(),
            trace,
        }
    }
}

impl fmt::Display for FunctionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { kind, message, .. } => write!(f, "{kind}: {message}"),
            Self::Retry { reason } => write!(f, "retry requested: {reason}"),
        }
    }
}

impl fmt::Debug for FunctionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { kind, message, .. } => f
                .debug_struct("Failed")
                .field("kind", kind)
                .field("message", message)
                .finish_non_exhaustive(),
            Self::Retry { reason } => f.debug_struct("Retry").field("reason", reason).finish(),
        }
    }
}

fn captured_backtrace() -> String {
    let backtrace = Backtrace::capture();
    match backtrace.status() {
        BacktraceStatus::Captured => backtrace.to_string(),
        _ => String::new(),
    }
}

/// Last path segment of a type name, without generic arguments.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, thiserror::Error)]
    #[error("x")]
    struct ValueError;

    #[derive(Debug, thiserror::Error)]
    #[error("lookup failed")]
    struct Outer(#[source] ValueError);

    fn call(args: Value, kwargs: Value) -> CallArgs {
        let Value::Array(args) = args else { panic!() };
        let Value::Object(kwargs) = kwargs else {
            panic!()
        };
        CallArgs::new(args, kwargs)
    }

    #[test]
    fn binds_by_position_or_name() {
        let args = call(json!([2]), json!({"b": 3}));
        assert_eq!(args.arg::<i64>(0, "a").unwrap(), 2);
        assert_eq!(args.arg::<i64>(1, "b").unwrap(), 3);
        assert_eq!(args.optional::<String>(2, "c").unwrap(), None);
    }

    #[test]
    fn argument_errors_name_the_parameter() {
        let args = call(json!(["two"]), json!({"a": 1}));

        let FunctionError::Failed { kind, message, .. } = args.arg::<i64>(0, "a").unwrap_err()
        else {
            panic!("expected a failure");
        };
        assert_eq!(kind, ARGUMENT_ERROR);
        assert!(message.contains("multiple values for argument 'a'"));

        let err = args.arg::<i64>(3, "z").unwrap_err();
        assert!(err.to_string().contains("missing required argument 'z'"));

        let err = call(json!(["two"]), json!({})).arg::<i64>(0, "n").unwrap_err();
        assert!(err.to_string().contains("invalid argument 'n'"));

        assert!(call(json!([1, 2, 3]), json!({})).expect_at_most(2).is_err());
    }

    #[test]
    fn errors_convert_with_their_type_name() {
        let err: FunctionError = ValueError.into();
        let FunctionError::Failed { kind, message, .. } = err else {
            panic!("expected a failure");
        };
        assert_eq!(kind, "ValueError");
        assert_eq!(message, "x");
    }

    #[test]
    fn conversion_keeps_the_source_chain() {
        let err: FunctionError = Outer(ValueError).into();
        let FunctionError::Failed { kind, trace, .. } = err else {
            panic!("expected a failure");
        };
        assert_eq!(kind, "Outer");
        assert!(trace.starts_with("caused by: x"));
    }

    #[test]
    fn short_type_names() {
        assert_eq!(short_type_name::<std::num::ParseIntError>(), "ParseIntError");
        assert_eq!(short_type_name::<Vec<String>>(), "Vec");
    }

    #[test]
    fn replies_serialize_lazily() {
        let reply: Box<dyn Reply> = Box::new(vec![1, 2]);
        assert_eq!(reply.to_json().unwrap(), json!([1, 2]));
    }
}
