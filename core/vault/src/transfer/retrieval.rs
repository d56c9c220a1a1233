//! Range-addressable retrieval.
//!
//! A sealed window can only be authenticated as a whole, so every window a
//! range touches is read and opened in full, then trimmed to the requested
//! bytes before it is emitted.

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use super::range::{ByteRange, RangeSpec, WindowPlan};
use super::{content_type, TransferEngine};
use crate::keyring::unwrap_dek;
use crate::records::FileRecord;
use corecloud_common::{Category, Error, FileId, OwnerId, Result, StoragePath};
use corecloud_crypto::{open_window, sealed_window_bounds, DataKey, WindowPosition, WrappingKey};
use corecloud_storage::BlobStore;

/// An opened file, ready to stream.
///
/// The record lookup, data key unwrap, blob presence and range checks have
/// all passed. Window failures past this point surface as errors in the
/// body stream.
pub struct Retrieval {
    record: FileRecord,
    range: Option<ByteRange>,
    body: BoxStream<'static, Result<Bytes>>,
}

impl Retrieval {
    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    /// Selected range; `None` only for an empty file.
    pub fn range(&self) -> Option<ByteRange> {
        self.range
    }

    /// Number of body bytes.
    pub fn content_length(&self) -> u64 {
        self.range.map_or(0, |r| r.len())
    }

    pub fn content_type(&self) -> &'static str {
        content_type(&self.record.kind)
    }

    /// `Content-Range` header value, when a range was selected.
    pub fn content_range(&self) -> Option<String> {
        self.range.map(|r| r.content_range(self.record.size))
    }

    /// Take the plaintext body stream.
    pub fn into_body(self) -> BoxStream<'static, Result<Bytes>> {
        self.body
    }

    /// Collect the whole body into memory.
    pub async fn read_to_end(self) -> Result<Vec<u8>> {
        self.body
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
    }
}

impl fmt::Debug for Retrieval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrieval")
            .field("file_id", &self.record.id)
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

/// Reads, opens and trims windows in ascending order.
struct WindowReader {
    blobs: Arc<dyn BlobStore>,
    path: StoragePath,
    file_id: FileId,
    dek: DataKey,
    window_size: u64,
    /// Index of the file's final window, not of the range's.
    final_window: u64,
    blob_len: u64,
    plan: WindowPlan,
    next: u64,
    failed: bool,
}

impl WindowReader {
    async fn read_window(&self, index: u64) -> Result<Bytes> {
        let (start, end) = sealed_window_bounds(index, self.window_size, self.blob_len);
        if start >= end {
            return Err(Error::Storage(format!(
                "Window {} missing from {}",
                index, self.path
            )));
        }
        let sealed = self.blobs.read_range(&self.path, start, end - start).await?;
        let position = WindowPosition::new(self.file_id, index, index == self.final_window);
        let opened = Zeroizing::new(open_window(&self.dek, &position, &sealed)?);
        Ok(Bytes::copy_from_slice(self.plan.trim(index, &opened)?))
    }

    fn into_stream(self) -> BoxStream<'static, Result<Bytes>> {
        stream::unfold(self, |mut reader| async move {
            if reader.failed || reader.next > reader.plan.last_window {
                return None;
            }
            let index = reader.next;
            match reader.read_window(index).await {
                Ok(chunk) => {
                    reader.next += 1;
                    Some((Ok(chunk), reader))
                }
                Err(e) => {
                    warn!(
                        path = %reader.path,
                        window = index,
                        error = %e,
                        "Window unreadable, ending body"
                    );
                    reader.failed = true;
                    Some((Err(e), reader))
                }
            }
        })
        .boxed()
    }
}

impl TransferEngine {
    /// Open a committed file for reading.
    ///
    /// With no `range` the whole file is selected.
    ///
    /// # Errors
    /// - `Error::NotFound` for an unknown, pending or other-category file,
    ///   or a missing blob
    /// - `Error::Crypto` if `wrapping_key` does not unwrap the file's key
    /// - `Error::RangeNotSatisfiable` if the range falls outside the file
    pub async fn open_retrieval(
        &self,
        owner: &OwnerId,
        id: &FileId,
        category: &Category,
        range: Option<RangeSpec>,
        wrapping_key: &WrappingKey,
    ) -> Result<Retrieval> {
        let record = self
            .records
            .find_file(id, owner)
            .await?
            .filter(|r| r.is_committed() && r.category == *category)
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", id)))?;
        if record.window_size == 0 {
            return Err(Error::Storage(format!("File {} has no window size", id)));
        }

        let dek = unwrap_dek(&record.wrapped_dek, wrapping_key)?;
        let path = self.locate(&record).await?;
        let blob_len = self.blobs.len(&path).await?;

        let range = match range {
            Some(spec) => Some(spec.resolve(record.size)?),
            None => ByteRange::full(record.size),
        };

        let body = match range {
            Some(range) => {
                let plan = WindowPlan::new(range, record.window_size);
                debug!(
                    file_id = %id,
                    start = range.start,
                    end = range.end,
                    windows = plan.window_count(),
                    "Retrieval opened"
                );
                WindowReader {
                    blobs: Arc::clone(&self.blobs),
                    path,
                    file_id: record.id,
                    dek,
                    window_size: record.window_size,
                    final_window: record.size.saturating_sub(1) / record.window_size,
                    blob_len,
                    plan,
                    next: plan.first_window,
                    failed: false,
                }
                .into_stream()
            }
            None => stream::empty().boxed(),
        };

        Ok(Retrieval {
            record,
            range,
            body,
        })
    }
}
