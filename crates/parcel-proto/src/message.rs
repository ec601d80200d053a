//! Call messages and the proxy envelope.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CodecError, Result};

/// Key marking a [`ProxyEnvelope`].
pub const PROXY_FIELD: &str = "proxy";

/// Key naming the target function of a [`CallMessage`].
pub const FUNCTION_FIELD: &str = "function";

/// One remote invocation as carried on the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallMessage {
    /// Target function. Absent is a dispatch error, not a decode error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,

    #[serde(default)]
    pub args: Vec<Value>,

    #[serde(default)]
    pub kwargs: Map<String, Value>,

    /// Blob key the outcome is written to. `None` discards the outcome.
    #[serde(default)]
    pub result_store: Option<String>,
}

impl CallMessage {
    #[must_use]
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: Some(function.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    #[must_use]
    pub fn with_result_store(mut self, key: impl Into<String>) -> Self {
        self.result_store = Some(key.into());
        self
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(CodecError::Encode)
    }
}

/// Pointer to a [`CallMessage`] stored in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEnvelope {
    pub proxy: String,
}

impl ProxyEnvelope {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { proxy: key.into() }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(CodecError::Encode)
    }
}

/// A decoded unit of work before proxy resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Call(CallMessage),
    Proxy(ProxyEnvelope),
}

impl Incoming {
    /// Classify a decoded JSON value.
    ///
    /// Any object carrying a `proxy` key is an envelope; every other object
    /// is read as a call message.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(CodecError::NotAnObject(json_kind(&value)));
        };

        if map.contains_key(PROXY_FIELD) {
            let envelope = serde_json::from_value(Value::Object(map)).map_err(CodecError::Decode)?;
            Ok(Self::Proxy(envelope))
        } else {
            let call = serde_json::from_value(Value::Object(map)).map_err(CodecError::Decode)?;
            Ok(Self::Call(call))
        }
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(raw).map_err(CodecError::Decode)?;
        Self::from_value(value)
    }

    /// The function name when it is known without resolving a proxy.
    pub fn function(&self) -> Option<&str> {
        match self {
            Self::Call(call) => call.function.as_deref(),
            Self::Proxy(_) => None,
        }
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_message_wire_shape() {
        let mut kwargs = Map::new();
        kwargs.insert("scale".to_owned(), json!(2));
        let call = CallMessage::new("multiply")
            .with_args(vec![json!(3), json!("x")])
            .with_kwargs(kwargs)
            .with_result_store("results/multiply/k.json");

        let value: Value = serde_json::from_str(&call.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "function": "multiply",
                "args": [3, "x"],
                "kwargs": {"scale": 2},
                "result_store": "results/multiply/k.json"
            })
        );
    }

    #[test]
    fn missing_fields_take_defaults() {
        let call: CallMessage = serde_json::from_str(r#"{"function": "ping"}"#).unwrap();
        assert_eq!(call, CallMessage::new("ping"));

        let call: CallMessage = serde_json::from_str(r#"{"result_store": "k"}"#).unwrap();
        assert!(call.function.is_none());
        assert_eq!(call.result_store.as_deref(), Some("k"));
    }

    #[test]
    fn proxy_key_wins_classification() {
        let event = json!({"proxy": "proxy/ping/k.json", "function": "ping"});
        let incoming = Incoming::from_value(event).unwrap();
        assert_eq!(
            incoming,
            Incoming::Proxy(ProxyEnvelope::new("proxy/ping/k.json"))
        );
        assert_eq!(incoming.function(), None);
    }

    #[test]
    fn non_objects_are_rejected() {
        assert!(matches!(
            Incoming::from_value(json!([1, 2])),
            Err(CodecError::NotAnObject("array"))
        ));
        assert!(matches!(
            Incoming::from_slice(b"invalid json"),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn wrongly_typed_fields_fail_to_decode() {
        assert!(matches!(
            Incoming::from_value(json!({"function": "ping", "args": "nope"})),
            Err(CodecError::Decode(_))
        ));
        assert!(matches!(
            Incoming::from_value(json!({"proxy": 7})),
            Err(CodecError::Decode(_))
        ));
    }
}
