//! Wire format shared by the parcel client and worker.
//!
//! A call travels as a JSON [`CallMessage`] on a queue, or as a
//! [`ProxyEnvelope`] pointing at the message in a blob store when it is too
//! large for the queue. The worker answers with an [`OutcomeRecord`] written
//! to the key named by the call's `result_store`.

mod codec;
mod error;
mod event;
mod keys;
mod message;
mod outcome;

pub use codec::{format_size, BuiltMessage, Codec, PROXY_THRESHOLD};
pub use error::{CodecError, Result};
pub use event::{BatchEvent, QueueRecord, RECORDS_FIELD};
pub use keys::{MessageKeys, PROXY_NAMESPACE, RESULTS_NAMESPACE};
pub use message::{CallMessage, Incoming, ProxyEnvelope, FUNCTION_FIELD, PROXY_FIELD};
pub use outcome::OutcomeRecord;
