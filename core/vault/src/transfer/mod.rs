//! Encrypted blob transfer engine.
//!
//! A file's content is stored as one blob of independently sealed windows
//! under a per-file data key. Ingest is a two-phase commit: the record is
//! written `pending` before any byte arrives, the blob is written and
//! verified against the declared size and checksum, and only then is the
//! record flipped to `committed`. Any failure purges both again.

mod ingest;
mod range;
mod reconcile;
mod retrieval;

pub use ingest::{IngestCursor, WindowBuffer};
pub use range::{ByteRange, RangeSpec, WindowPlan};
pub use reconcile::SweepReport;
pub use retrieval::Retrieval;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use crate::keyring::wrap_dek;
use crate::records::{
    FileFilter, FileRecord, FileState, FileSummary, LocationRecord, RecordStore,
};
use corecloud_common::{Category, Error, FileId, LocationId, OwnerId, Result, StoragePath};
use corecloud_crypto::{DataKey, WrappingKey};
use corecloud_storage::{BlobStore, BlobWriter};

/// Length of a SHA-512 digest.
pub const CHECKSUM_LENGTH: usize = 64;

/// File extension of sealed blobs.
pub const BLOB_EXTENSION: &str = "sealedbox";

/// Media type for a declared file kind.
pub fn content_type(kind: &str) -> &'static str {
    match kind {
        "Apple MPEG-4 Audio" => "audio/mp4",
        _ => "application/octet-stream",
    }
}

/// Decode a base64 SHA-512 checksum as declared by a client.
///
/// # Errors
/// - `Error::Validation` if the value is not base64 or not 64 bytes long
pub fn decode_checksum(encoded: &str) -> Result<Vec<u8>> {
    let checksum = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::Validation(format!("Checksum is not base64: {}", e)))?;
    if checksum.len() != CHECKSUM_LENGTH {
        return Err(Error::Validation(format!(
            "Checksum must be {} bytes, got {}",
            CHECKSUM_LENGTH,
            checksum.len()
        )));
    }
    Ok(checksum)
}

/// Declared metadata of a file about to be ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRequest {
    pub name: String,
    pub kind: String,
    /// Declared plaintext size in bytes.
    pub size: u64,
    /// Declared SHA-512 digest of the plaintext.
    pub checksum: Vec<u8>,
    pub category: Category,
    pub location_id: LocationId,
}

impl IngestRequest {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("File name cannot be empty".to_string()));
        }
        if self.checksum.len() != CHECKSUM_LENGTH {
            return Err(Error::Validation(format!(
                "Checksum must be {} bytes, got {}",
                CHECKSUM_LENGTH,
                self.checksum.len()
            )));
        }
        Ok(())
    }
}

/// Blob transfer engine over a record store and a blob store.
///
/// Cheap to clone; every clone shares the same collaborators.
#[derive(Clone)]
pub struct TransferEngine {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    window_size: u64,
}

impl TransferEngine {
    /// Create an engine sealing new files with `window_size` byte windows.
    ///
    /// # Errors
    /// - `Error::Validation` if the window size is zero or not addressable
    pub fn new(
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        window_size: u64,
    ) -> Result<Self> {
        if window_size == 0 || usize::try_from(window_size).is_err() {
            return Err(Error::Validation(format!(
                "Invalid window size: {}",
                window_size
            )));
        }
        Ok(Self {
            records,
            blobs,
            window_size,
        })
    }

    /// Plaintext window size used for new files.
    pub fn window_size(&self) -> u64 {
        self.window_size
    }

    /// Register a storage location for an owner and create its root.
    pub async fn add_location(&self, owner: &OwnerId, root: StoragePath) -> Result<LocationRecord> {
        let record = LocationRecord {
            id: LocationId::generate(),
            owner: owner.clone(),
            root,
        };
        self.blobs.create_dir_all(&record.root).await?;
        self.records.insert_location(&record).await?;

        debug!(owner = %owner, location_id = %record.id, root = %record.root, "Location added");
        Ok(record)
    }

    /// Committed files of an owner.
    pub async fn list_files(&self, owner: &OwnerId, filter: &FileFilter) -> Result<Vec<FileSummary>> {
        let records = self.records.list_files(owner, filter).await?;
        Ok(records.iter().map(FileSummary::from).collect())
    }

    /// Start an ingest: persist a pending record and open its blob.
    ///
    /// # Postconditions
    /// - A fresh data key is generated and stored wrapped under `wrapping_key`
    /// - The record exists in `pending` state before any content is accepted
    ///
    /// # Errors
    /// - `Error::Validation` for malformed metadata or an unknown location
    /// - `Error::Database` / `Error::Storage` if either store fails; nothing
    ///   is left behind
    pub async fn begin_ingest(
        &self,
        owner: &OwnerId,
        request: IngestRequest,
        wrapping_key: &WrappingKey,
    ) -> Result<IngestCursor> {
        request.validate()?;
        let location = self
            .records
            .find_location(&request.location_id, owner)
            .await?
            .ok_or_else(|| {
                Error::Validation(format!("Unknown location: {}", request.location_id))
            })?;

        let dek = DataKey::generate();
        let record = FileRecord {
            id: FileId::generate(),
            owner: owner.clone(),
            name: request.name,
            kind: request.kind,
            size: request.size,
            checksum: request.checksum,
            category: request.category,
            location_id: request.location_id,
            wrapped_dek: wrap_dek(&dek, wrapping_key)?,
            window_size: self.window_size,
            state: FileState::Pending,
            created_at: Utc::now(),
        };
        let path = blob_path(&location, &record)?;

        self.records.insert_file(&record).await?;

        let writer = match self.open_blob(&path).await {
            Ok(writer) => writer,
            Err(e) => {
                self.purge(&record, Some(&path)).await;
                return Err(e);
            }
        };

        debug!(
            owner = %owner,
            file_id = %record.id,
            size = record.size,
            window_size = self.window_size,
            "Ingest started"
        );
        Ok(IngestCursor::new(self.clone(), record, path, dek, writer))
    }

    async fn open_blob(&self, path: &StoragePath) -> Result<Box<dyn BlobWriter>> {
        if let Some(parent) = path.parent() {
            self.blobs.create_dir_all(&parent).await?;
        }
        self.blobs.create(path).await
    }

    /// Physical path of a record's blob.
    ///
    /// # Errors
    /// - `Error::NotFound` if the record's location no longer exists
    async fn locate(&self, record: &FileRecord) -> Result<StoragePath> {
        let location = self
            .records
            .find_location(&record.location_id, &record.owner)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Location not found: {}", record.location_id)))?;
        blob_path(&location, record)
    }
}

/// `{root}/{location}/{owner}/{category}/{file}.sealedbox`
fn blob_path(location: &LocationRecord, record: &FileRecord) -> Result<StoragePath> {
    location
        .root
        .join(&location.id.to_string())?
        .join(record.owner.as_str())?
        .join(record.category.as_str())?
        .join(&format!("{}.{}", record.id, BLOB_EXTENSION))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRecordStore;
    use corecloud_crypto::MasterKey;
    use corecloud_storage::MemoryBlobStore;
    use futures::stream;
    use sha2::{Digest, Sha512};

    pub(super) const W: u64 = 16;

    pub(super) struct Fixture {
        pub engine: TransferEngine,
        pub records: MemoryRecordStore,
        pub blobs: MemoryBlobStore,
        pub owner: OwnerId,
        pub location: LocationRecord,
        pub wk: WrappingKey,
    }

    pub(super) async fn fixture_with(blobs: MemoryBlobStore) -> Fixture {
        let records = MemoryRecordStore::new();
        let engine =
            TransferEngine::new(Arc::new(records.clone()), Arc::new(blobs.clone()), W).unwrap();
        let owner = OwnerId::new("alice").unwrap();
        let location = engine
            .add_location(&owner, StoragePath::parse("/disk1").unwrap())
            .await
            .unwrap();
        Fixture {
            engine,
            records,
            blobs,
            owner,
            location,
            wk: MasterKey::generate().session_wrapping_key().unwrap(),
        }
    }

    pub(super) async fn fixture() -> Fixture {
        fixture_with(MemoryBlobStore::new()).await
    }

    pub(super) fn request(fx: &Fixture, data: &[u8]) -> IngestRequest {
        IngestRequest {
            name: "track.m4a".to_string(),
            kind: "Apple MPEG-4 Audio".to_string(),
            size: data.len() as u64,
            checksum: Sha512::digest(data).to_vec(),
            category: Category::new("music").unwrap(),
            location_id: fx.location.id,
        }
    }

    pub(super) fn body(data: &[u8], chunk: usize) -> impl futures::Stream<Item = Result<bytes::Bytes>> + Send + Unpin {
        let chunks: Vec<Result<bytes::Bytes>> = data
            .chunks(chunk.max(1))
            .map(|c| Ok(bytes::Bytes::copy_from_slice(c)))
            .collect();
        stream::iter(chunks)
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("Apple MPEG-4 Audio"), "audio/mp4");
        assert_eq!(content_type("PDF document"), "application/octet-stream");
    }

    #[test]
    fn test_decode_checksum() {
        let digest = Sha512::digest(b"hello");
        assert_eq!(decode_checksum(&STANDARD.encode(digest)).unwrap(), digest.to_vec());
        assert!(matches!(decode_checksum("***"), Err(Error::Validation(_))));
        assert!(matches!(
            decode_checksum(&STANDARD.encode([0u8; 32])),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_zero_window_rejected() {
        let result = TransferEngine::new(
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemoryBlobStore::new()),
            0,
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_blob_path_layout() {
        let fx = fixture().await;
        let data = b"0123456789";
        let cursor = fx
            .engine
            .begin_ingest(&fx.owner, request(&fx, data), &fx.wk)
            .await
            .unwrap();
        let expected = format!(
            "/disk1/{}/alice/music/{}.sealedbox",
            fx.location.id,
            cursor.file_id()
        );
        assert_eq!(cursor.path().to_string_path(), expected);
        cursor.abort().await;
    }

    #[tokio::test]
    async fn test_unknown_location_is_validation_error() {
        let fx = fixture().await;
        let mut req = request(&fx, b"data");
        req.location_id = LocationId::generate();

        assert!(matches!(
            fx.engine.begin_ingest(&fx.owner, req, &fx.wk).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(fx.records.file_count(), 0);
    }

    #[tokio::test]
    async fn test_other_owner_cannot_use_location() {
        let fx = fixture().await;
        let mallory = OwnerId::new("mallory").unwrap();
        assert!(matches!(
            fx.engine
                .begin_ingest(&mallory, request(&fx, b"data"), &fx.wk)
                .await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_record_failure_leaves_nothing() {
        let fx = fixture().await;
        fx.records.set_reject_writes(true);

        assert!(matches!(
            fx.engine
                .begin_ingest(&fx.owner, request(&fx, b"data"), &fx.wk)
                .await,
            Err(Error::Database(_))
        ));
        assert_eq!(fx.blobs.blob_count(), 0);
    }

    #[tokio::test]
    async fn test_list_files_only_committed() {
        let fx = fixture().await;
        let data = b"committed file";
        let committed = fx
            .engine
            .ingest_stream(&fx.owner, request(&fx, data), &fx.wk, body(data, 4))
            .await
            .unwrap();
        let _pending = fx
            .engine
            .begin_ingest(&fx.owner, request(&fx, b"pending"), &fx.wk)
            .await
            .unwrap();

        let listed = fx
            .engine
            .list_files(&fx.owner, &FileFilter::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, committed);
        assert_eq!(listed[0].size, data.len() as u64);
    }
}
