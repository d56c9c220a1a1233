//! In-memory blob store for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::provider::{BlobStore, BlobWriter};
use corecloud_common::{Error, Result, StoragePath};

#[derive(Default)]
struct Inner {
    blobs: HashMap<String, Vec<u8>>,
    dirs: HashSet<String>,
}

/// In-memory blob store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. A write budget can be set to simulate a disk that
/// fails part-way through a transfer.
#[derive(Clone)]
pub struct MemoryBlobStore {
    inner: Arc<RwLock<Inner>>,
    write_budget: Arc<AtomicUsize>,
}

impl MemoryBlobStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            inner: Arc::default(),
            write_budget: Arc::new(AtomicUsize::new(usize::MAX)),
        }
    }

    /// Fail every `write_at` after the first `writes` succeed.
    pub fn with_write_budget(self, writes: usize) -> Self {
        self.write_budget.store(writes, Ordering::SeqCst);
        self
    }

    /// Number of blobs currently stored.
    pub fn blob_count(&self) -> usize {
        self.inner.read().map(|inner| inner.blobs.len()).unwrap_or(0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| Error::Storage("memory store poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| Error::Storage("memory store poisoned".to_string()))
    }

    fn key(path: &StoragePath) -> String {
        path.to_string_path()
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryBlobWriter {
    store: MemoryBlobStore,
    key: String,
}

#[async_trait]
impl BlobWriter for MemoryBlobWriter {
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let remaining = self.store.write_budget.load(Ordering::SeqCst);
        if remaining == 0 {
            return Err(Error::Storage("simulated write failure".to_string()));
        }
        if remaining != usize::MAX {
            self.store.write_budget.store(remaining - 1, Ordering::SeqCst);
        }

        let mut inner = self.store.write()?;
        let blob = inner
            .blobs
            .get_mut(&self.key)
            .ok_or_else(|| Error::Storage(format!("Blob vanished: {}", self.key)))?;

        let offset = offset as usize;
        if blob.len() < offset + data.len() {
            blob.resize(offset + data.len(), 0);
        }
        blob[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn create_dir_all(&self, path: &StoragePath) -> Result<()> {
        let mut inner = self.write()?;
        let mut current = Some(path.clone());
        while let Some(dir) = current {
            inner.dirs.insert(Self::key(&dir));
            current = dir.parent();
        }
        Ok(())
    }

    async fn exists(&self, path: &StoragePath) -> Result<bool> {
        let key = Self::key(path);
        let inner = self.read()?;
        Ok(path.is_root() || inner.blobs.contains_key(&key) || inner.dirs.contains(&key))
    }

    async fn create(&self, path: &StoragePath) -> Result<Box<dyn BlobWriter>> {
        let key = Self::key(path);
        let mut inner = self.write()?;

        if let Some(parent) = path.parent() {
            if !parent.is_root() && !inner.dirs.contains(&Self::key(&parent)) {
                return Err(Error::Storage(format!("Parent directory not found: {}", path)));
            }
        }
        if inner.blobs.contains_key(&key) {
            return Err(Error::Storage(format!("Blob already exists: {}", path)));
        }

        inner.blobs.insert(key.clone(), Vec::new());
        Ok(Box::new(MemoryBlobWriter {
            store: self.clone(),
            key,
        }))
    }

    async fn len(&self, path: &StoragePath) -> Result<u64> {
        self.read()?
            .blobs
            .get(&Self::key(path))
            .map(|blob| blob.len() as u64)
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", path)))
    }

    async fn read_range(&self, path: &StoragePath, offset: u64, len: u64) -> Result<Vec<u8>> {
        let inner = self.read()?;
        let blob = inner
            .blobs
            .get(&Self::key(path))
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", path)))?;

        let start = (offset as usize).min(blob.len());
        let end = start.saturating_add(len as usize).min(blob.len());
        Ok(blob[start..end].to_vec())
    }

    async fn delete(&self, path: &StoragePath) -> Result<()> {
        self.write()?
            .blobs
            .remove(&Self::key(path))
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_write_read() {
        let store = MemoryBlobStore::new();
        let dir = StoragePath::parse("/a/b").unwrap();
        let path = dir.join("blob").unwrap();

        store.create_dir_all(&dir).await.unwrap();
        let mut writer = store.create(&path).await.unwrap();
        writer.write_at(0, b"abc").await.unwrap();
        writer.write_at(3, b"def").await.unwrap();
        writer.close().await.unwrap();

        assert_eq!(store.len(&path).await.unwrap(), 6);
        assert_eq!(store.read_range(&path, 2, 3).await.unwrap(), b"cde");
        assert!(store.exists(&StoragePath::parse("/a").unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_write_budget() {
        let store = MemoryBlobStore::new().with_write_budget(1);
        let path = StoragePath::parse("/blob").unwrap();

        let mut writer = store.create(&path).await.unwrap();
        writer.write_at(0, b"ok").await.unwrap();
        assert!(matches!(writer.write_at(2, b"no").await, Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn test_memory_requires_parent() {
        let store = MemoryBlobStore::new();
        let path = StoragePath::parse("/missing/blob").unwrap();
        assert!(store.create(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_delete() {
        let store = MemoryBlobStore::new();
        let path = StoragePath::parse("/blob").unwrap();
        store.create(&path).await.unwrap();

        store.delete(&path).await.unwrap();
        assert_eq!(store.blob_count(), 0);
        assert!(matches!(store.delete(&path).await, Err(Error::NotFound(_))));
    }
}
