//! Object Storage for Uploaded Images
//!
//! Information Hiding:
//! - Object store backends (memory, filesystem) hidden behind `ObjectStore`
//! - Key layout `images/<chat_id>/<filename>` owned by this module
//! - `BlobManager` is the only component that deletes blobs

use async_trait::async_trait;
use thiserror::Error;

pub mod filesystem;
pub mod manager;
pub mod memory;

pub use filesystem::FilesystemObjectStore;
pub use manager::BlobManager;
pub use memory::MemoryObjectStore;

const IMAGE_PREFIX: &str = "images";

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("bucket '{0}' does not exist")]
    NoSuchBucket(String),
    #[error("invalid object key '{0}'")]
    InvalidKey(String),
    #[error("object store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Key-addressed blob storage grouped into buckets.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the bucket. An existing bucket is not an error.
    async fn create_bucket(&self, bucket: &str) -> Result<(), BlobError>;

    async fn put_object(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), BlobError>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, BlobError>;

    /// Keys starting with `prefix`, in lexicographic order.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, BlobError>;

    /// Delete the given keys in one call. Missing keys are ignored.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), BlobError>;
}

/// Prefix under which every blob of a conversation lives.
pub fn chat_prefix(chat_id: &str) -> String {
    format!("{}/{}/", IMAGE_PREFIX, chat_id)
}

pub fn blob_key(chat_id: &str, filename: &str) -> String {
    format!("{}{}", chat_prefix(chat_id), filename)
}

/// Reject keys that could escape their bucket once mapped onto a path.
pub(crate) fn validate_key(key: &str) -> Result<(), BlobError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}
