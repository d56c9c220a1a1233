//! Local filesystem blob store.

use async_trait::async_trait;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::provider::{BlobStore, BlobWriter};
use corecloud_common::{Error, Result, StoragePath};

/// Local filesystem blob store.
///
/// Every [`StoragePath`] resolves beneath a fixed root directory.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a new local store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a StoragePath to a filesystem path.
    fn to_fs_path(&self, path: &StoragePath) -> PathBuf {
        let mut fs_path = self.root.clone();
        for component in path.components() {
            fs_path.push(component);
        }
        fs_path
    }
}

fn not_found_or(path: &StoragePath, e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::NotFound {
        Error::NotFound(format!("Blob not found: {}", path))
    } else {
        Error::Io(e)
    }
}

struct LocalBlobWriter {
    file: File,
}

#[async_trait]
impl BlobWriter for LocalBlobWriter {
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await?;
        Ok(())
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn create_dir_all(&self, path: &StoragePath) -> Result<()> {
        fs::create_dir_all(self.to_fs_path(path)).await?;
        Ok(())
    }

    async fn exists(&self, path: &StoragePath) -> Result<bool> {
        Ok(fs::try_exists(self.to_fs_path(path)).await?)
    }

    async fn create(&self, path: &StoragePath) -> Result<Box<dyn BlobWriter>> {
        let fs_path = self.to_fs_path(path);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&fs_path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => {
                    Error::Storage(format!("Blob already exists: {}", path))
                }
                ErrorKind::NotFound => {
                    Error::Storage(format!("Parent directory not found: {}", path))
                }
                _ => Error::Io(e),
            })?;

        debug!(path = %path, "Blob created");
        Ok(Box::new(LocalBlobWriter { file }))
    }

    async fn len(&self, path: &StoragePath) -> Result<u64> {
        let meta = fs::metadata(self.to_fs_path(path))
            .await
            .map_err(|e| not_found_or(path, e))?;
        if meta.is_dir() {
            return Err(Error::Storage(format!("Not a blob: {}", path)));
        }
        Ok(meta.len())
    }

    async fn read_range(&self, path: &StoragePath, offset: u64, len: u64) -> Result<Vec<u8>> {
        let mut file = File::open(self.to_fs_path(path))
            .await
            .map_err(|e| not_found_or(path, e))?;

        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::new();
        file.take(len).read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn delete(&self, path: &StoragePath) -> Result<()> {
        fs::remove_file(self.to_fs_path(path))
            .await
            .map_err(|e| not_found_or(path, e))?;
        debug!(path = %path, "Blob deleted");
        Ok(())
    }
}
