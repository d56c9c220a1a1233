//! Ingest write path shared by both front-ends.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use super::{IngestRequest, TransferEngine};
use crate::records::FileRecord;
use corecloud_common::{Error, FileId, OwnerId, Result, StoragePath};
use corecloud_crypto::{seal_window, DataKey, WindowPosition, WrappingKey};
use corecloud_storage::BlobWriter;

/// Mutable state of one in-flight ingest.
///
/// Owned by exactly one task; every window passes through [`push_window`]
/// in arrival order. A cursor must end in [`commit`] or [`abort`]; dropping
/// it leaves a pending record for the reconcile sweep.
///
/// [`push_window`]: IngestCursor::push_window
/// [`commit`]: IngestCursor::commit
/// [`abort`]: IngestCursor::abort
pub struct IngestCursor {
    engine: TransferEngine,
    record: FileRecord,
    path: StoragePath,
    dek: DataKey,
    writer: Box<dyn BlobWriter>,
    digest: Sha512,
    /// Physical offset of the next sealed window.
    offset: u64,
    /// Plaintext bytes accepted so far.
    received: u64,
    windows: u64,
    saw_short_window: bool,
}

impl IngestCursor {
    pub(super) fn new(
        engine: TransferEngine,
        record: FileRecord,
        path: StoragePath,
        dek: DataKey,
        writer: Box<dyn BlobWriter>,
    ) -> Self {
        Self {
            engine,
            record,
            path,
            dek,
            writer,
            digest: Sha512::new(),
            offset: 0,
            received: 0,
            windows: 0,
            saw_short_window: false,
        }
    }

    pub fn file_id(&self) -> FileId {
        self.record.id
    }

    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    /// Blob path being written.
    pub fn path(&self) -> &StoragePath {
        &self.path
    }

    /// Plaintext bytes accepted so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Plaintext window size of this file.
    pub fn window_size(&self) -> u64 {
        self.record.window_size
    }

    /// Seal one plaintext window and append it to the blob.
    ///
    /// Every window must hold exactly the window size except the last,
    /// which may be shorter.
    ///
    /// # Errors
    /// - `Error::Validation` for an empty or oversized window, or a window
    ///   following a short one
    /// - `Error::IntegrityMismatch` once more bytes arrive than were declared
    /// - `Error::Storage` / `Error::Io` if the blob write fails
    ///
    /// The cursor is not cleaned up on error; pass it to [`fail`](Self::fail).
    pub async fn push_window(&mut self, window: &[u8]) -> Result<()> {
        let len = window.len() as u64;
        if window.is_empty() {
            return Err(Error::Validation("Empty window".to_string()));
        }
        if len > self.record.window_size {
            return Err(Error::Validation(format!(
                "Window of {} bytes exceeds the window size of {}",
                len, self.record.window_size
            )));
        }
        if self.saw_short_window {
            return Err(Error::Validation(
                "Window received after the final short window".to_string(),
            ));
        }
        self.check_declared_size(len)?;

        let last = self.received + len == self.record.size;
        let position = WindowPosition::new(self.record.id, self.windows, last);
        let sealed = seal_window(&self.dek, &position, window)?;
        self.writer.write_at(self.offset, &sealed).await?;
        self.digest.update(window);

        self.offset += sealed.len() as u64;
        self.received += len;
        self.windows += 1;
        self.saw_short_window = len < self.record.window_size;

        debug!(
            file_id = %self.record.id,
            window = self.windows - 1,
            offset = self.offset,
            "Window written"
        );
        Ok(())
    }

    /// Fail with `IntegrityMismatch` if `incoming` more bytes would exceed
    /// the declared size.
    pub fn check_declared_size(&self, incoming: u64) -> Result<()> {
        if self.received.saturating_add(incoming) > self.record.size {
            return Err(Error::IntegrityMismatch(format!(
                "Received more than the declared {} bytes",
                self.record.size
            )));
        }
        Ok(())
    }

    /// Close the blob, verify it against the declared metadata and commit.
    ///
    /// # Errors
    /// - `Error::IntegrityMismatch` if the size or checksum disagree; the
    ///   blob and record are purged
    /// - Storage or database errors, after the same purge
    pub async fn commit(self) -> Result<FileId> {
        let Self {
            engine,
            record,
            path,
            writer,
            digest,
            received,
            windows,
            ..
        } = self;

        let outcome = async {
            writer.close().await?;
            verify(&record, received, &digest.finalize())?;
            engine
                .records
                .mark_file_committed(&record.id, &record.owner)
                .await
        }
        .await;

        match outcome {
            Ok(()) => {
                info!(
                    owner = %record.owner,
                    file_id = %record.id,
                    size = received,
                    windows,
                    "File committed"
                );
                Ok(record.id)
            }
            Err(e) => {
                warn!(file_id = %record.id, error = %e, "Commit failed, purging file");
                engine.purge(&record, Some(&path)).await;
                Err(e)
            }
        }
    }

    /// Abandon the ingest and purge the partial blob and its record.
    pub async fn abort(self) {
        let Self {
            engine,
            record,
            path,
            writer,
            ..
        } = self;
        drop(writer);

        debug!(file_id = %record.id, "Ingest aborted");
        engine.purge(&record, Some(&path)).await;
    }

    /// Abort with `err` as the cause, returning it for propagation.
    pub async fn fail(self, err: Error) -> Error {
        warn!(file_id = %self.record.id, error = %err, "Ingest failed, purging file");
        self.abort().await;
        err
    }
}

fn verify(record: &FileRecord, received: u64, observed: &[u8]) -> Result<()> {
    if received != record.size {
        return Err(Error::IntegrityMismatch(format!(
            "Declared {} bytes, received {}",
            record.size, received
        )));
    }
    if !bool::from(observed.ct_eq(&record.checksum)) {
        return Err(Error::IntegrityMismatch(
            "Checksum does not match content".to_string(),
        ));
    }
    Ok(())
}

/// Regroups an arbitrarily chunked byte stream into fixed-size windows.
#[derive(Debug)]
pub struct WindowBuffer {
    buf: BytesMut,
    window_len: usize,
}

impl WindowBuffer {
    pub fn new(window_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(window_len),
            window_len,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Take the next complete window, if one is buffered.
    pub fn next_full(&mut self) -> Option<Bytes> {
        if self.buf.len() >= self.window_len {
            Some(self.buf.split_to(self.window_len).freeze())
        } else {
            None
        }
    }

    /// The trailing short window, if any bytes remain.
    pub fn finish(self) -> Option<Bytes> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.freeze())
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl TransferEngine {
    /// Ingest a streamed request body.
    ///
    /// On any error the partial blob and record are purged before the error
    /// is returned. Callers that may be cancelled (e.g. by a client
    /// disconnect) should run this inside a spawned task so the purge
    /// still happens.
    pub async fn ingest_stream<S>(
        &self,
        owner: &OwnerId,
        request: IngestRequest,
        wrapping_key: &WrappingKey,
        mut body: S,
    ) -> Result<FileId>
    where
        S: Stream<Item = Result<Bytes>> + Send + Unpin,
    {
        let mut cursor = self.begin_ingest(owner, request, wrapping_key).await?;
        // Window size was checked against usize in TransferEngine::new
        let mut buffer = WindowBuffer::new(cursor.window_size() as usize);

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => return Err(cursor.fail(e).await),
            };
            buffer.extend(&chunk);
            if let Err(e) = cursor.check_declared_size(buffer.len() as u64) {
                return Err(cursor.fail(e).await);
            }
            while let Some(window) = buffer.next_full() {
                if let Err(e) = cursor.push_window(&window).await {
                    return Err(cursor.fail(e).await);
                }
            }
        }

        if let Some(rest) = buffer.finish() {
            if let Err(e) = cursor.push_window(&rest).await {
                return Err(cursor.fail(e).await);
            }
        }
        cursor.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{body, fixture, fixture_with, request, W};
    use super::*;
    use crate::records::RecordStore;
    use corecloud_common::Category;
    use corecloud_storage::{BlobStore, MemoryBlobStore};
    use futures::stream;

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    #[test]
    fn test_window_buffer_regroups() {
        let mut buffer = WindowBuffer::new(4);
        buffer.extend(b"abcdef");
        assert_eq!(buffer.next_full().unwrap(), Bytes::from_static(b"abcd"));
        assert!(buffer.next_full().is_none());
        buffer.extend(b"gh");
        assert_eq!(buffer.next_full().unwrap(), Bytes::from_static(b"efgh"));
        assert!(buffer.is_empty());
        buffer.extend(b"i");
        assert_eq!(buffer.finish().unwrap(), Bytes::from_static(b"i"));
    }

    #[tokio::test]
    async fn test_blob_layout_matches_windows() {
        let fx = fixture().await;
        let content = data(3 * W as usize + 5);

        let id = fx
            .engine
            .ingest_stream(&fx.owner, request(&fx, &content), &fx.wk, body(&content, 7))
            .await
            .unwrap();

        let record = fx.records.find_file(&id, &fx.owner).await.unwrap().unwrap();
        assert!(record.is_committed());
        let path = fx.engine.locate(&record).await.unwrap();
        // Three full windows and one short one, each carrying 28 bytes of overhead
        assert_eq!(fx.blobs.len(&path).await.unwrap(), 3 * (W + 28) + 5 + 28);
    }

    #[tokio::test]
    async fn test_wrong_checksum_purges() {
        let fx = fixture().await;
        let content = data(10);
        let mut req = request(&fx, &content);
        req.checksum[0] ^= 0xff;

        let result = fx
            .engine
            .ingest_stream(&fx.owner, req, &fx.wk, body(&content, 3))
            .await;
        assert!(matches!(result, Err(Error::IntegrityMismatch(_))));
        assert_eq!(fx.records.file_count(), 0);
        assert_eq!(fx.blobs.blob_count(), 0);
    }

    #[tokio::test]
    async fn test_short_stream_purges() {
        let fx = fixture().await;
        let content = data(20);
        let mut req = request(&fx, &content);
        req.size = 40;

        let result = fx
            .engine
            .ingest_stream(&fx.owner, req, &fx.wk, body(&content, 20))
            .await;
        assert!(matches!(result, Err(Error::IntegrityMismatch(_))));
        assert_eq!(fx.records.file_count(), 0);
        assert_eq!(fx.blobs.blob_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_stream_aborts_early() {
        let fx = fixture().await;
        let content = data(100);
        let mut req = request(&fx, &content);
        req.size = 10;

        let result = fx
            .engine
            .ingest_stream(&fx.owner, req, &fx.wk, body(&content, 100))
            .await;
        assert!(matches!(result, Err(Error::IntegrityMismatch(_))));
        assert_eq!(fx.blobs.blob_count(), 0);
    }

    #[tokio::test]
    async fn test_body_error_purges() {
        let fx = fixture().await;
        let content = data(40);
        let chunks: Vec<Result<Bytes>> = vec![
            Ok(Bytes::copy_from_slice(&content[..20])),
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "client went away",
            ))),
        ];

        let result = fx
            .engine
            .ingest_stream(&fx.owner, request(&fx, &content), &fx.wk, stream::iter(chunks))
            .await;
        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(fx.records.file_count(), 0);
        assert_eq!(fx.blobs.blob_count(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_purges() {
        let fx = fixture_with(MemoryBlobStore::new().with_write_budget(2)).await;
        let content = data(5 * W as usize);

        let result = fx
            .engine
            .ingest_stream(&fx.owner, request(&fx, &content), &fx.wk, body(&content, 16))
            .await;
        assert!(matches!(result, Err(Error::Storage(_))));
        assert!(result.unwrap_err().should_retry());
        assert_eq!(fx.records.file_count(), 0);
        assert_eq!(fx.blobs.blob_count(), 0);
    }

    #[tokio::test]
    async fn test_window_rules() {
        let fx = fixture().await;
        let content = data(40);

        let mut cursor = fx
            .engine
            .begin_ingest(&fx.owner, request(&fx, &content), &fx.wk)
            .await
            .unwrap();
        assert!(matches!(cursor.push_window(&[]).await, Err(Error::Validation(_))));
        assert!(matches!(
            cursor.push_window(&content[..W as usize + 1]).await,
            Err(Error::Validation(_))
        ));
        cursor.push_window(&content[..8]).await.unwrap();
        assert!(matches!(
            cursor.push_window(&content[8..9]).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(cursor.received(), 8);
        cursor.abort().await;
        assert_eq!(fx.records.file_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_file_commits() {
        let fx = fixture().await;
        let id = fx
            .engine
            .ingest_stream(&fx.owner, request(&fx, &[]), &fx.wk, body(&[], 1))
            .await
            .unwrap();

        let record = fx.records.find_file(&id, &fx.owner).await.unwrap().unwrap();
        assert!(record.is_committed());
        assert_eq!(record.category, Category::new("music").unwrap());
    }

    #[tokio::test]
    async fn test_each_file_gets_its_own_key() {
        let fx = fixture().await;
        let content = data(10);
        let a = fx
            .engine
            .ingest_stream(&fx.owner, request(&fx, &content), &fx.wk, body(&content, 10))
            .await
            .unwrap();
        let b = fx
            .engine
            .ingest_stream(&fx.owner, request(&fx, &content), &fx.wk, body(&content, 10))
            .await
            .unwrap();

        let ra = fx.records.find_file(&a, &fx.owner).await.unwrap().unwrap();
        let rb = fx.records.find_file(&b, &fx.owner).await.unwrap().unwrap();
        let dek_a = crate::keyring::unwrap_dek(&ra.wrapped_dek, &fx.wk).unwrap();
        let dek_b = crate::keyring::unwrap_dek(&rb.wrapped_dek, &fx.wk).unwrap();
        assert_ne!(dek_a.as_bytes(), dek_b.as_bytes());

        let blob_a = fx
            .blobs
            .read_range(&fx.engine.locate(&ra).await.unwrap(), 0, 1 << 20)
            .await
            .unwrap();
        let position = WindowPosition::new(a, 0, true);
        assert!(corecloud_crypto::open_window(&dek_b, &position, &blob_a).is_err());
        assert_eq!(
            corecloud_crypto::open_window(&dek_a, &position, &blob_a).unwrap(),
            content
        );
        let moved = WindowPosition::new(b, 0, true);
        assert!(corecloud_crypto::open_window(&dek_a, &moved, &blob_a).is_err());
    }
}
