//! Turning outcomes into stored bytes.

use parcel_proto::OutcomeRecord;
use serde_json::Value;
use thiserror::Error;

use crate::function::Reply;
use crate::outcome::Outcome;

/// Kind recorded when an outcome cannot be encoded.
pub const SERIALIZATION_ERROR: &str = "SerializationError";

#[derive(Error, Debug)]
#[error("{0}")]
pub struct EncodeError(pub String);

impl From<serde_json::Error> for EncodeError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// Encodes outcomes before they are written to the result key.
///
/// The default methods produce the standard record shape; implementations
/// usually override only [`encode_result`](Self::encode_result) to change how
/// return values are represented.
pub trait OutcomeEncoder: Send + Sync {
    fn encode_result(&self, reply: &dyn Reply) -> Result<Value, EncodeError> {
        Ok(reply.to_json()?)
    }

    fn encode(&self, outcome: &Outcome) -> Result<Vec<u8>, EncodeError> {
        let record = match outcome {
            Outcome::Success(reply) => OutcomeRecord::result(self.encode_result(&**reply)?),
            Outcome::Failure(failure) => {
                OutcomeRecord::exception(failure.repr(), failure.traceback())
            }
            Outcome::RetryRequested { .. } => {
                return Err(EncodeError("retry requests are not recorded".into()))
            }
        };
        record.to_vec().map_err(|e| EncodeError(e.to_string()))
    }
}

/// Plain `serde_json` encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl OutcomeEncoder for JsonEncoder {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Failure;
    use serde::ser::{Error as _, Serializer};
    use serde::Serialize;
    use serde_json::json;

    struct Opaque;

    impl Serialize for Opaque {
        fn serialize<S: Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("Object of type Opaque is not JSON serializable"))
        }
    }

    /// Wraps every result in an envelope with a schema version.
    struct Versioned;

    impl OutcomeEncoder for Versioned {
        fn encode_result(&self, reply: &dyn Reply) -> Result<Value, EncodeError> {
            Ok(json!({"v": 2, "data": reply.to_json()?}))
        }
    }

    fn decode(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn success_and_failure_shapes() {
        let bytes = JsonEncoder.encode(&Outcome::success("pong")).unwrap();
        assert_eq!(decode(&bytes), json!({"result": "pong"}));

        let failure = Failure::new("ValueError", "x").with_trace("at f\n");
        let bytes = JsonEncoder.encode(&Outcome::Failure(failure)).unwrap();
        assert_eq!(
            decode(&bytes),
            json!({"exception": "ValueError(\"x\")", "traceback": "ValueError: x\nat f\n"})
        );
    }

    #[test]
    fn unserializable_results_fail_to_encode() {
        let err = JsonEncoder.encode(&Outcome::success(Opaque)).unwrap_err();
        assert!(err.to_string().contains("not JSON serializable"));
    }

    #[test]
    fn custom_encoders_shape_results() {
        let bytes = Versioned.encode(&Outcome::success(vec![1, 2])).unwrap();
        assert_eq!(decode(&bytes), json!({"result": {"v": 2, "data": [1, 2]}}));
    }
}
