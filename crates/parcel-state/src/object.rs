//! Blob store backed by `object_store`.
//!
//! Supports in-memory, local filesystem, and S3 backends. One underlying
//! store is created per bucket on first use and cached for the lifetime of
//! the [`ObjectBlobStore`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tracing::debug;

use crate::error::BlobError;
use crate::traits::BlobStore;

/// Which `object_store` implementation to build for each bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ObjectStoreKind {
    #[default]
    Memory,
    /// Each bucket is a directory under `root`.
    Local { root: PathBuf },
    S3 {
        region: Option<String>,
        /// Endpoint override for S3-compatible stores.
        endpoint: Option<String>,
    },
}

pub struct ObjectBlobStore {
    kind: ObjectStoreKind,
    stores: DashMap<String, Arc<dyn ObjectStore>>,
}

impl ObjectBlobStore {
    pub fn new(kind: ObjectStoreKind) -> Self {
        Self {
            kind,
            stores: DashMap::new(),
        }
    }

    /// Use a pre-built store for `bucket` instead of constructing one.
    #[must_use]
    pub fn with_store(self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.stores.insert(bucket.into(), store);
        self
    }

    pub fn kind(&self) -> &ObjectStoreKind {
        &self.kind
    }

    async fn store_for(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, BlobError> {
        if let Some(store) = self.stores.get(bucket) {
            return Ok(Arc::clone(store.value()));
        }

        let store = self.create_store(bucket).await?;
        debug!(bucket = %bucket, kind = ?self.kind, "created object store");

        let entry = self
            .stores
            .entry(bucket.to_owned())
            .or_insert_with(|| store);
        Ok(Arc::clone(entry.value()))
    }

    async fn create_store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, BlobError> {
        match &self.kind {
            ObjectStoreKind::Memory => Ok(Arc::new(InMemory::new())),
            ObjectStoreKind::Local { root } => {
                let dir = root.join(bucket);
                tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                    BlobError::Backend(format!("failed to create {}: {e}", dir.display()))
                })?;
                let store = LocalFileSystem::new_with_prefix(&dir)
                    .map_err(|e| BlobError::Backend(e.to_string()))?;
                Ok(Arc::new(store))
            }
            ObjectStoreKind::S3 { region, endpoint } => {
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
                if let Some(region) = region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_allow_http(endpoint.starts_with("http://"));
                }
                let store = builder
                    .build()
                    .map_err(|e| BlobError::Connection(e.to_string()))?;
                Ok(Arc::new(store))
            }
        }
    }
}

impl std::fmt::Debug for ObjectBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBlobStore")
            .field("kind", &self.kind)
            .field("buckets", &self.stores.len())
            .finish()
    }
}

fn object_path(key: &str) -> Result<ObjectPath, BlobError> {
    if key.is_empty() {
        return Err(BlobError::InvalidKey("key must not be empty".to_owned()));
    }
    ObjectPath::parse(key).map_err(|e| BlobError::InvalidKey(e.to_string()))
}

fn map_error(bucket: &str, key: &str, err: object_store::Error) -> BlobError {
    match err {
        object_store::Error::NotFound { .. } => BlobError::not_found(bucket, key),
        other => BlobError::Backend(other.to_string()),
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = object_path(key)?;
        let store = self.store_for(bucket).await?;

        let result = store
            .get(&path)
            .await
            .map_err(|e| map_error(bucket, key, e))?;
        let data = result
            .bytes()
            .await
            .map_err(|e| map_error(bucket, key, e))?;

        Ok(data.to_vec())
    }

    async fn put(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), BlobError> {
        let path = object_path(key)?;
        let store = self.store_for(bucket).await?;

        store
            .put(&path, Bytes::copy_from_slice(body).into())
            .await
            .map_err(|e| map_error(bucket, key, e))?;

        debug!(bucket = %bucket, key = %key, size = body.len(), "object stored");
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<bool, BlobError> {
        let path = object_path(key)?;
        let store = self.store_for(bucket).await?;

        match store.head(&path).await {
            Ok(_) => {}
            Err(object_store::Error::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(map_error(bucket, key, e)),
        }

        store
            .delete(&path)
            .await
            .map_err(|e| map_error(bucket, key, e))?;
        Ok(true)
    }
}
