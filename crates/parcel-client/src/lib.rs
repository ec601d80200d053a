//! Client side of parcel remote calls.
//!
//! A [`DispatchClient`] serializes a call onto the worker's queue and
//! returns a [`ResultHandle`]. The handle polls the blob store until the
//! worker has written the outcome.
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use parcel_client::{DispatchClient, WaitPolicy};
//! use serde_json::{json, Map};
//!
//! let client = DispatchClient::from_env().await?;
//! let mut handle = client.invoke("ping", vec![], Map::new()).await?;
//! assert_eq!(handle.result(WaitPolicy::default()).await?, json!("pong"));
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod result;

pub use client::{DispatchClient, Invoker};
pub use config::{ClientConfig, CONFIG_FILE, ENV_PREFIX};
pub use error::{ConfigError, DispatchError, ResultError};
pub use result::{ResultHandle, SchedulerSleep, Suspend, ThreadSleep, WaitPolicy};
