//! Outcome records written to the result key.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CodecError, Result};

/// The recorded result of one executed call.
///
/// Exactly one of `result` or `exception` is present on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutcomeRecord {
    Result {
        result: Value,
    },
    Exception {
        exception: String,
        traceback: String,
    },
}

impl OutcomeRecord {
    #[must_use]
    pub fn result(value: Value) -> Self {
        Self::Result { result: value }
    }

    #[must_use]
    pub fn exception(exception: impl Into<String>, traceback: impl Into<String>) -> Self {
        Self::Exception {
            exception: exception.into(),
            traceback: traceback.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Result { .. })
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(CodecError::Decode)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(CodecError::Encode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_both_shapes() {
        assert_eq!(
            OutcomeRecord::from_slice(br#"{"result": "pong"}"#).unwrap(),
            OutcomeRecord::result(json!("pong"))
        );
        assert_eq!(
            OutcomeRecord::from_slice(br#"{"exception": "E('x')", "traceback": "tb"}"#).unwrap(),
            OutcomeRecord::exception("E('x')", "tb")
        );
    }

    #[test]
    fn null_result_is_still_a_result() {
        let record = OutcomeRecord::from_slice(br#"{"result": null}"#).unwrap();
        assert!(record.is_success());
        assert_eq!(record, OutcomeRecord::result(Value::Null));
    }

    #[test]
    fn encodes_exactly_one_key_family() {
        let encoded: Value =
            serde_json::from_slice(&OutcomeRecord::result(json!(42)).to_vec().unwrap()).unwrap();
        assert_eq!(encoded, json!({"result": 42}));

        let encoded: Value =
            serde_json::from_slice(&OutcomeRecord::exception("e", "t").to_vec().unwrap()).unwrap();
        assert_eq!(encoded, json!({"exception": "e", "traceback": "t"}));
    }

    #[test]
    fn rejects_records_with_neither_key() {
        assert!(OutcomeRecord::from_slice(br#"{"something": 1}"#).is_err());
    }
}
