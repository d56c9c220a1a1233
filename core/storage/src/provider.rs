//! Blob store trait definition.

use async_trait::async_trait;

use corecloud_common::{Result, StoragePath};

/// Sequential writer for one write-once blob.
///
/// Writes are issued at explicit offsets so the caller owns the cursor;
/// the transfer engine only ever writes at monotonically advancing offsets.
#[async_trait]
pub trait BlobWriter: Send {
    /// Write `data` at absolute byte `offset`.
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Flush and close the blob.
    ///
    /// # Postconditions
    /// - All previously written bytes are durable
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Physical storage collaborator.
///
/// All paths are relative to the store's root. Blobs are never mutated once
/// written: there is no update path, only create and delete.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create a directory and all missing parents.
    async fn create_dir_all(&self, path: &StoragePath) -> Result<()>;

    /// Check if a path exists.
    async fn exists(&self, path: &StoragePath) -> Result<bool>;

    /// Create a new blob for writing.
    ///
    /// # Errors
    /// - `Error::Storage` if the blob already exists or the parent is missing
    async fn create(&self, path: &StoragePath) -> Result<Box<dyn BlobWriter>>;

    /// Total length of a blob in bytes.
    ///
    /// # Errors
    /// - `Error::NotFound` if the blob does not exist
    async fn len(&self, path: &StoragePath) -> Result<u64>;

    /// Read up to `len` bytes starting at `offset`.
    ///
    /// Returns fewer bytes when the blob ends first, and an empty vector
    /// when `offset` is at or past the end.
    async fn read_range(&self, path: &StoragePath, offset: u64, len: u64) -> Result<Vec<u8>>;

    /// Delete a blob.
    ///
    /// # Errors
    /// - `Error::NotFound` if the blob does not exist
    async fn delete(&self, path: &StoragePath) -> Result<()>;
}
