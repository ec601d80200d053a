//! Building outgoing messages and resolving incoming ones.
//!
//! Queue messages are capped at [`MAX_QUEUE_MESSAGE_SIZE`] bytes. A call
//! whose serialized form exceeds [`PROXY_THRESHOLD`] is written to the blob
//! store under its proxy key and replaced on the queue by a
//! [`ProxyEnvelope`]. The threshold is measured on the exact bytes that
//! would otherwise be sent, `result_store` included.

use std::sync::Arc;
use std::time::Instant;

use parcel_state::{BlobStore, MAX_QUEUE_MESSAGE_SIZE};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::Result;
use crate::keys::MessageKeys;
use crate::message::{CallMessage, Incoming, ProxyEnvelope};

/// Largest inline message body; leaves headroom under the queue limit.
pub const PROXY_THRESHOLD: usize = 250_000;

const _: () = assert!(PROXY_THRESHOLD < MAX_QUEUE_MESSAGE_SIZE);

/// A message ready to be sent to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltMessage {
    /// Queue payload: the call itself, or a proxy envelope.
    pub body: String,
    /// Key the worker will write the outcome to.
    pub result_store: String,
    /// Set when `body` is a proxy envelope.
    pub proxied: bool,
}

/// Message codec bound to the bucket holding proxied bodies.
#[derive(Clone)]
pub struct Codec {
    store: Arc<dyn BlobStore>,
    bucket: String,
}

impl Codec {
    pub fn new(store: Arc<dyn BlobStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Serialize a call, proxying it through the blob store when too large
    /// or when `force_proxy` is set.
    pub async fn build(
        &self,
        function: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        keys: &MessageKeys,
        force_proxy: bool,
    ) -> Result<BuiltMessage> {
        let call = CallMessage {
            function: Some(function.to_owned()),
            args,
            kwargs,
            result_store: Some(keys.result.clone()),
        };
        let body = call.to_json()?;

        info!(
            function = %function,
            result_store = %keys.result,
            size = %format_size(body.len()),
            "built call message"
        );

        if body.len() <= PROXY_THRESHOLD && !force_proxy {
            return Ok(BuiltMessage {
                body,
                result_store: keys.result.clone(),
                proxied: false,
            });
        }

        let started = Instant::now();
        self.store
            .put(&self.bucket, &keys.proxy, body.as_bytes())
            .await?;
        info!(
            function = %function,
            proxy = %keys.proxy,
            elapsed_ms = started.elapsed().as_millis(),
            "uploaded proxy body"
        );

        Ok(BuiltMessage {
            body: ProxyEnvelope::new(keys.proxy.clone()).to_json()?,
            result_store: keys.result.clone(),
            proxied: true,
        })
    }

    /// Decode raw queue bytes into a call, following a proxy if present.
    pub async fn parse_incoming(&self, raw: &[u8]) -> Result<CallMessage> {
        self.resolve(Incoming::from_slice(raw)?).await
    }

    /// Follow exactly one level of proxy indirection.
    ///
    /// The proxied body is always read as a call message; an envelope stored
    /// behind an envelope comes back as a call without a function.
    pub async fn resolve(&self, incoming: Incoming) -> Result<CallMessage> {
        match incoming {
            Incoming::Call(call) => Ok(call),
            Incoming::Proxy(envelope) => {
                debug!(proxy = %envelope.proxy, bucket = %self.bucket, "fetching proxied message");
                let raw = self.store.get(&self.bucket, &envelope.proxy).await?;
                let value: Value =
                    serde_json::from_slice(&raw).map_err(crate::error::CodecError::Decode)?;
                serde_json::from_value(value).map_err(crate::error::CodecError::Decode)
            }
        }
    }
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

/// Human-readable size with binary prefixes, e.g. `1.5KiB`.
#[must_use]
pub fn format_size(bytes: usize) -> String {
    const UNITS: [&str; 8] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "Zi"];

    #[allow(clippy::cast_precision_loss)]
    let mut num = bytes as f64;
    for unit in UNITS {
        if num.abs() < 1024.0 {
            return format!("{num:3.1}{unit}B");
        }
        num /= 1024.0;
    }
    format!("{num:.1}YiB")
}
