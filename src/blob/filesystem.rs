//! File System Object Store
//!
//! Information Hiding:
//! - Objects live at `{root}/{bucket}/{key}`, key segments mapped to directories
//! - Directory walking and cleanup hidden behind the `ObjectStore` interface

use super::{validate_key, BlobError, ObjectStore};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bucket_path(&self, bucket: &str) -> Result<PathBuf, BlobError> {
        validate_key(bucket)?;
        if bucket.contains('/') {
            return Err(BlobError::InvalidKey(bucket.to_string()));
        }
        Ok(self.root.join(bucket))
    }

    async fn existing_bucket(&self, bucket: &str) -> Result<PathBuf, BlobError> {
        let path = self.bucket_path(bucket)?;
        if !fs::try_exists(&path).await? {
            return Err(BlobError::NoSuchBucket(bucket.to_string()));
        }
        Ok(path)
    }
}

fn relative_key(bucket_dir: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(bucket_dir).ok()?;
    let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn create_bucket(&self, bucket: &str) -> Result<(), BlobError> {
        let path = self.bucket_path(bucket)?;
        fs::create_dir_all(&path).await?;
        tracing::debug!("[FilesystemObjectStore] Bucket '{}' ready at {:?}", bucket, path);
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        validate_key(key)?;
        let path = self.existing_bucket(bucket).await?.join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, BlobError> {
        validate_key(key)?;
        let path = self.existing_bucket(bucket).await?.join(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, BlobError> {
        let bucket_dir = self.existing_bucket(bucket).await?;

        // Only walk the deepest directory named by the prefix.
        let start = match prefix.rfind('/') {
            Some(idx) => bucket_dir.join(&prefix[..idx]),
            None => bucket_dir.clone(),
        };
        if !fs::try_exists(&start).await? {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Some(key) = relative_key(&bucket_dir, &path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), BlobError> {
        let bucket_dir = self.existing_bucket(bucket).await?;
        for key in keys {
            validate_key(key)?;
            let path = bucket_dir.join(key);
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }

            // Prune directories left empty, stopping at the bucket.
            let mut parent = path.parent().map(Path::to_path_buf);
            while let Some(dir) = parent {
                if dir == bucket_dir || fs::remove_dir(&dir).await.is_err() {
                    break;
                }
                parent = dir.parent().map(Path::to_path_buf);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_list_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemObjectStore::new(temp_dir.path());
        store.create_bucket("images").await.unwrap();

        store
            .put_object("images", "images/c1/a.png", b"aaa".to_vec())
            .await
            .unwrap();
        store
            .put_object("images", "images/c1/b.png", b"bbb".to_vec())
            .await
            .unwrap();
        store
            .put_object("images", "images/c2/c.png", b"ccc".to_vec())
            .await
            .unwrap();

        assert_eq!(
            store.get_object("images", "images/c1/a.png").await.unwrap(),
            Some(b"aaa".to_vec())
        );

        let keys = store.list_objects("images", "images/c1/").await.unwrap();
        assert_eq!(keys, vec!["images/c1/a.png", "images/c1/b.png"]);

        store.delete_objects("images", &keys).await.unwrap();
        assert!(store.list_objects("images", "images/c1/").await.unwrap().is_empty());
        assert!(!temp_dir.path().join("images/images/c1").exists());
        assert_eq!(store.list_objects("images", "images/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_bucket_and_bad_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemObjectStore::new(temp_dir.path());

        let err = store
            .put_object("nope", "images/c/a.png", vec![1])
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::NoSuchBucket(_)));

        store.create_bucket("b").await.unwrap();
        let err = store
            .put_object("b", "../escape.png", vec![1])
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::InvalidKey(_)));

        assert!(store.get_object("b", "images/x/none.png").await.unwrap().is_none());
        assert!(store.list_objects("b", "images/x/").await.unwrap().is_empty());
    }
}
