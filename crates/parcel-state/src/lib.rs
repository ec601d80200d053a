//! Queue and blob store backends for parcel.
//!
//! The RPC layer talks to its two external services through
//! [`QueueBackend`] and [`BlobStore`]. In-memory implementations back tests
//! and local development; `object_store` and PostgreSQL implementations back
//! real deployments.

mod error;
mod traits;
mod types;

#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "object")]
mod object;

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "config")]
mod config;

#[cfg(feature = "config")]
mod provider;

pub use error::{BlobError, QueueError, StateError};
pub use traits::{BlobStore, QueueBackend, MAX_QUEUE_MESSAGE_SIZE};
pub use types::{Message, MessageId};

#[cfg(feature = "memory")]
pub use memory::{MemoryBlobStore, MemoryQueue};

#[cfg(feature = "object")]
pub use object::{ObjectBlobStore, ObjectStoreKind};

#[cfg(feature = "postgres")]
pub use postgres::PostgresQueue;

#[cfg(feature = "config")]
pub use config::{BlobConfig, QueueConfig, StateConfig};

#[cfg(feature = "config")]
pub use provider::StateProvider;
