use std::sync::Arc;

use parcel_proto::{Codec, MessageKeys};
use parcel_state::{BlobStore, QueueBackend, StateProvider};
use serde_json::{Map, Value};
use tracing::info;

use crate::config::ClientConfig;
use crate::error::{ConfigError, DispatchError};
use crate::result::ResultHandle;

/// Sends calls to a worker's queue and hands back result handles.
///
/// Cloning is cheap; clones share the queue and blob store handles.
#[derive(Clone)]
pub struct DispatchClient {
    queue: Arc<dyn QueueBackend>,
    codec: Codec,
    queue_name: String,
    key_prefix: Option<String>,
}

impl DispatchClient {
    pub fn new(
        queue: Arc<dyn QueueBackend>,
        store: Arc<dyn BlobStore>,
        queue_name: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            codec: Codec::new(store, bucket),
            queue_name: queue_name.into(),
            key_prefix: None,
        }
    }

    /// Build a client, and its backends, from loaded configuration.
    pub async fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        let provider = StateProvider::connect(&config.state()).await?;
        let client = Self::new(
            provider.queue(),
            provider.blob(),
            config.queue.clone(),
            config.bucket.clone(),
        );

        Ok(match &config.key_prefix {
            Some(prefix) => client.with_key_prefix(prefix.clone()),
            None => client,
        })
    }

    /// Client configured from `parcel.toml` and `PARCEL_*` variables.
    pub async fn from_env() -> Result<Self, ConfigError> {
        Self::from_config(&ClientConfig::load(None)?).await
    }

    /// Client for the service named by `PARCEL_<SERVICE>_QUEUE`.
    pub async fn for_service(service: &str) -> Result<Self, ConfigError> {
        Self::from_config(&ClientConfig::for_service(service)?).await
    }

    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn bucket(&self) -> &str {
        self.codec.bucket()
    }

    /// Callable bound to `name`. The name is not checked until a worker
    /// tries to run it.
    pub fn function(&self, name: impl Into<String>) -> Invoker {
        Invoker {
            client: self.clone(),
            name: name.into(),
            force_proxy: false,
        }
    }

    /// Queue a call to `name` and return a handle on its result.
    pub async fn invoke(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<ResultHandle, DispatchError> {
        self.dispatch(name, args, kwargs, false).await
    }

    async fn dispatch(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        force_proxy: bool,
    ) -> Result<ResultHandle, DispatchError> {
        let keys = MessageKeys::generate_with_prefix(self.key_prefix.as_deref(), name);
        let built = self
            .codec
            .build(name, args, kwargs, &keys, force_proxy)
            .await?;

        let id = self
            .queue
            .send(&self.queue_name, built.body.as_bytes())
            .await?;
        info!(
            function = %name,
            queue = %self.queue_name,
            message_id = %id,
            proxied = built.proxied,
            "dispatched call"
        );

        Ok(ResultHandle::new(
            Arc::clone(self.codec.store()),
            self.codec.bucket(),
            built.result_store,
        ))
    }
}

impl std::fmt::Debug for DispatchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchClient")
            .field("queue_name", &self.queue_name)
            .field("bucket", &self.codec.bucket())
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

/// A remote function bound to a client.
#[derive(Debug, Clone)]
pub struct Invoker {
    client: DispatchClient,
    name: String,
    force_proxy: bool,
}

impl Invoker {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Always route the call body through the blob store.
    #[must_use]
    pub fn force_proxy(mut self) -> Self {
        self.force_proxy = true;
        self
    }

    pub async fn call(
        &self,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<ResultHandle, DispatchError> {
        self.client
            .dispatch(&self.name, args, kwargs, self.force_proxy)
            .await
    }
}
