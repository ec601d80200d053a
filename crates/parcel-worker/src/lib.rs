//! Worker side of parcel remote calls.
//!
//! A [`Handler`] owns the [`FunctionRegistry`] and turns queue messages into
//! recorded outcomes. A [`Consumer`] feeds it batches from a queue backend.
//!
//! ```no_run
//! use std::sync::Arc;
//! use parcel_state::MemoryBlobStore;
//! use parcel_worker::{CallArgs, FunctionError, Handler};
//!
//! fn add(args: CallArgs) -> Result<i64, FunctionError> {
//!     Ok(args.arg::<i64>(0, "a")? + args.arg::<i64>(1, "b")?)
//! }
//!
//! let mut handler = Handler::new(Arc::new(MemoryBlobStore::new()), "results");
//! handler.registry_mut().register(add);
//! ```

pub mod config;
mod consumer;
mod context;
mod encoder;
mod error;
mod function;
mod handler;
mod outcome;
mod registry;
mod sink;

pub use config::{ConsumerSettings, MetricsSettings, WorkerConfig};
pub use consumer::Consumer;
pub use context::InvocationContext;
pub use encoder::{EncodeError, JsonEncoder, OutcomeEncoder, SERIALIZATION_ERROR};
pub use error::{ConfigError, HandlerError, WorkerError};
pub use function::{CallArgs, FunctionError, Reply, ARGUMENT_ERROR};
pub use handler::Handler;
pub use outcome::{Failure, Outcome};
pub use registry::{FunctionRegistry, Invocation, SyncFn, TaskFn, DISPATCH_ERROR, PANIC};
pub use sink::{FacadeSink, MetricsSink, NoopSink, Tags, COUNT, REMAINING_MILLISECONDS};
