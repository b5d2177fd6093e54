//! Blob Lifecycle Manager
//!
//! Information Hiding:
//! - The active (store, bucket) pair sits behind an atomically swapped handle
//! - Reconfiguration builds a new handle; in-flight calls finish on the old one

use super::{
    blob_key, chat_prefix, BlobError, FilesystemObjectStore, MemoryObjectStore, ObjectStore,
};
use crate::config::{ObjectBackend, ObjectStorageConfig};
use arc_swap::ArcSwap;
use std::path::PathBuf;
use std::sync::Arc;

/// Object store plus the bucket images are written to.
pub struct BlobTarget {
    pub store: Arc<dyn ObjectStore>,
    pub bucket: String,
}

pub struct BlobManager {
    target: ArcSwap<BlobTarget>,
}

impl BlobManager {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            target: ArcSwap::from_pointee(BlobTarget {
                store,
                bucket: bucket.into(),
            }),
        }
    }

    /// Build the configured backend and make sure its bucket exists.
    pub async fn from_config(config: &ObjectStorageConfig) -> Result<Self, BlobError> {
        let target = connect(config).await?;
        Ok(Self {
            target: ArcSwap::from_pointee(target),
        })
    }

    /// Replace the active target wholesale. The old target stays in place if
    /// the new one cannot be prepared.
    pub async fn reconfigure(&self, config: &ObjectStorageConfig) -> Result<(), BlobError> {
        let target = connect(config).await?;
        tracing::info!(
            "[BlobManager] Switched object storage to {:?} bucket '{}'",
            config.backend,
            target.bucket
        );
        self.target.store(Arc::new(target));
        Ok(())
    }

    pub fn current(&self) -> Arc<BlobTarget> {
        self.target.load_full()
    }

    /// Store an uploaded image under `images/<chat_id>/<filename>` and return its key.
    pub async fn upload(
        &self,
        chat_id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String, BlobError> {
        let target = self.current();
        let key = blob_key(chat_id, filename);
        let size = bytes.len();

        target.store.put_object(&target.bucket, &key, bytes).await?;
        tracing::info!(
            "[BlobManager] Uploaded {} bytes to '{}/{}'",
            size,
            target.bucket,
            key
        );
        Ok(key)
    }

    pub async fn remove(&self, key: &str) -> Result<(), BlobError> {
        let target = self.current();
        target
            .store
            .delete_objects(&target.bucket, &[key.to_string()])
            .await?;
        tracing::debug!("[BlobManager] Removed '{}/{}'", target.bucket, key);
        Ok(())
    }

    /// Keys currently stored for a conversation.
    pub async fn list(&self, chat_id: &str) -> Result<Vec<String>, BlobError> {
        let target = self.current();
        target
            .store
            .list_objects(&target.bucket, &chat_prefix(chat_id))
            .await
    }

    /// Delete every blob under the conversation's prefix in one batch.
    /// Returns how many keys were removed; zero is not an error.
    pub async fn delete_all(&self, chat_id: &str) -> Result<usize, BlobError> {
        let target = self.current();
        let prefix = chat_prefix(chat_id);
        let keys = target.store.list_objects(&target.bucket, &prefix).await?;

        if keys.is_empty() {
            tracing::debug!(
                "[BlobManager] No objects under '{}/{}', nothing to delete",
                target.bucket,
                prefix
            );
            return Ok(0);
        }

        target.store.delete_objects(&target.bucket, &keys).await?;
        tracing::info!(
            "[BlobManager] Deleted {} objects under '{}/{}'",
            keys.len(),
            target.bucket,
            prefix
        );
        Ok(keys.len())
    }
}

async fn connect(config: &ObjectStorageConfig) -> Result<BlobTarget, BlobError> {
    let store: Arc<dyn ObjectStore> = match config.backend {
        ObjectBackend::Memory => Arc::new(MemoryObjectStore::new()),
        ObjectBackend::Filesystem => {
            let root = config.root.as_deref().unwrap_or("./object-store");
            Arc::new(FilesystemObjectStore::new(PathBuf::from(root)))
        }
    };
    store.create_bucket(&config.bucket).await?;
    Ok(BlobTarget {
        store,
        bucket: config.bucket.clone(),
    })
}
