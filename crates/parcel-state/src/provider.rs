use std::sync::Arc;

use crate::config::{BlobConfig, QueueConfig, StateConfig};
use crate::error::StateError;
use crate::traits::{BlobStore, QueueBackend};

#[cfg(feature = "memory")]
use crate::memory::{MemoryBlobStore, MemoryQueue};

#[cfg(feature = "object")]
use crate::object::{ObjectBlobStore, ObjectStoreKind};

#[cfg(feature = "postgres")]
use crate::postgres::PostgresQueue;

impl BlobConfig {
    /// Instantiates the selected blob store.
    pub fn open(&self) -> Result<Arc<dyn BlobStore>, StateError> {
        match self {
            #[cfg(feature = "memory")]
            Self::Memory => Ok(Arc::new(MemoryBlobStore::new())),
            #[cfg(not(feature = "memory"))]
            Self::Memory => Err(StateError::BackendDisabled("memory")),

            #[cfg(feature = "object")]
            Self::Local { root } => Ok(Arc::new(ObjectBlobStore::new(ObjectStoreKind::Local {
                root: root.clone(),
            }))),

            #[cfg(feature = "object")]
            Self::S3 { region, endpoint } => Ok(Arc::new(ObjectBlobStore::new(ObjectStoreKind::S3 {
                region: region.clone(),
                endpoint: endpoint.clone(),
            }))),
        }
    }
}

impl QueueConfig {
    /// Instantiates the selected queue backend, connecting if it is remote.
    pub async fn open(&self) -> Result<Arc<dyn QueueBackend>, StateError> {
        match self {
            #[cfg(feature = "memory")]
            Self::Memory => Ok(Arc::new(MemoryQueue::new())),
            #[cfg(not(feature = "memory"))]
            Self::Memory => Err(StateError::BackendDisabled("memory")),

            #[cfg(feature = "postgres")]
            Self::Postgres { url, table } => PostgresQueue::new(url, table.as_str())
                .await
                .map(|queue| Arc::new(queue) as Arc<dyn QueueBackend>)
                .map_err(|e| StateError::Connection(e.to_string())),
        }
    }
}

/// The pair of backends a client or worker runs against.
#[derive(Clone)]
pub struct StateProvider {
    blob: Arc<dyn BlobStore>,
    queue: Arc<dyn QueueBackend>,
}

impl StateProvider {
    pub fn new(blob: Arc<dyn BlobStore>, queue: Arc<dyn QueueBackend>) -> Self {
        Self { blob, queue }
    }

    pub async fn connect(config: &StateConfig) -> Result<Self, StateError> {
        let blob = config.blob.open()?;
        let queue = config.queue.open().await?;
        tracing::debug!(blob = ?config.blob, "State backends ready");
        Ok(Self::new(blob, queue))
    }

    pub fn blob(&self) -> Arc<dyn BlobStore> {
        Arc::clone(&self.blob)
    }

    pub fn queue(&self) -> Arc<dyn QueueBackend> {
        Arc::clone(&self.queue)
    }
}

impl std::fmt::Debug for StateProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateProvider").finish_non_exhaustive()
    }
}
