//! Binary content storage for enrolled samples.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::SignatureError;

/// BlobStore holds the binary content of samples, addressed by relative
/// slash-separated paths.
///
/// Implementations must be safe for concurrent use (Send + Sync). `put` must
/// not leave a readable partial object behind when it fails.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, content: &[u8]) -> Result<(), SignatureError>;

    async fn get(&self, path: &str) -> Result<Vec<u8>, SignatureError>;

    /// Remove an object. Removing a missing object is not an error.
    async fn delete(&self, path: &str) -> Result<(), SignatureError>;

    async fn exists(&self, path: &str) -> Result<bool, SignatureError>;
}

fn persistence(path: &str, e: impl std::fmt::Display) -> SignatureError {
    SignatureError::Persistence(format!("blob {path}: {e}"))
}

/// In-memory blob store. Clones share the same objects.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted object paths.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .objects
            .read()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, content: &[u8]) -> Result<(), SignatureError> {
        let mut objects = self.objects.write().map_err(|e| persistence(path, e))?;
        objects.insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, SignatureError> {
        let objects = self.objects.read().map_err(|e| persistence(path, e))?;
        objects
            .get(path)
            .cloned()
            .ok_or_else(|| persistence(path, "not found"))
    }

    async fn delete(&self, path: &str) -> Result<(), SignatureError> {
        let mut objects = self.objects.write().map_err(|e| persistence(path, e))?;
        objects.remove(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, SignatureError> {
        let objects = self.objects.read().map_err(|e| persistence(path, e))?;
        Ok(objects.contains_key(path))
    }
}

/// Filesystem blob store rooted at a directory.
///
/// Writes go to a sibling temporary file which is renamed into place, so a
/// failed or interrupted `put` never exposes a truncated object.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, SignatureError> {
        let rel = Path::new(path);
        let ok = !path.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !ok {
            return Err(persistence(path, "path escapes the blob root"));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait::async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &str, content: &[u8]) -> Result<(), SignatureError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| persistence(path, e))?;
        }

        let mut tmp_name = target.as_os_str().to_owned();
        tmp_name.push(format!(".tmp-{}", uuid::Uuid::new_v4().simple()));
        let tmp = PathBuf::from(tmp_name);

        let written = match tokio::fs::write(&tmp, content).await {
            Ok(()) => tokio::fs::rename(&tmp, &target).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(persistence(path, e));
        }
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, SignatureError> {
        let target = self.resolve(path)?;
        tokio::fs::read(&target)
            .await
            .map_err(|e| persistence(path, e))
    }

    async fn delete(&self, path: &str) -> Result<(), SignatureError> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(persistence(path, e)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, SignatureError> {
        let target = self.resolve(path)?;
        tokio::fs::try_exists(&target)
            .await
            .map_err(|e| persistence(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn memory_put_get_delete() {
        let store = MemoryBlobStore::new();
        store.put("signatures/42/a.png", b"abc").await.unwrap();
        assert!(store.exists("signatures/42/a.png").await.unwrap());
        assert_eq!(store.get("signatures/42/a.png").await.unwrap(), b"abc");

        store.delete("signatures/42/a.png").await.unwrap();
        store.delete("signatures/42/a.png").await.unwrap();
        assert!(store.is_empty());
        assert!(store.get("signatures/42/a.png").await.is_err());
    }

    #[tokio::test]
    async fn fs_put_get_delete() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        store.put("signatures/42/a.png", b"abc").await.unwrap();
        assert!(dir.path().join("signatures/42/a.png").is_file());
        assert_eq!(store.get("signatures/42/a.png").await.unwrap(), b"abc");

        store.delete("signatures/42/a.png").await.unwrap();
        assert!(!store.exists("signatures/42/a.png").await.unwrap());
        store.delete("signatures/42/a.png").await.unwrap();
    }

    #[tokio::test]
    async fn fs_put_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        store.put("signatures/42/a.png", b"abc").await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path().join("signatures/42"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.png"]);
    }

    #[tokio::test]
    async fn fs_rejects_escaping_paths() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(store.put("../x.png", b"abc").await.is_err());
        assert!(store.put("/etc/x.png", b"abc").await.is_err());
        assert!(store.get("").await.is_err());
    }
}
