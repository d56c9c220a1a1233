//! Compensating deletes and the pending-record sweep.

use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

use super::{blob_path, TransferEngine};
use crate::records::FileRecord;
use corecloud_common::{Error, Result, StoragePath};

/// Outcome of a reconcile sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stale pending files whose blob and record were removed.
    pub removed: usize,
    /// Stale pending files left for a later sweep.
    pub retained: usize,
}

impl TransferEngine {
    /// Delete a file's blob, then its record. Returns whether both are gone.
    ///
    /// A blob that is already missing counts as deleted. If the blob delete
    /// fails the record is kept, still pending, so a later sweep can retry.
    /// Failures are logged, never returned.
    pub(super) async fn purge(&self, record: &FileRecord, path: Option<&StoragePath>) -> bool {
        if let Some(path) = path {
            match self.blobs.delete(path).await {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(e) => {
                    warn!(
                        file_id = %record.id,
                        path = %path,
                        error = %e,
                        "Blob cleanup failed, record left pending"
                    );
                    return false;
                }
            }
        }

        match self.records.delete_file(&record.id, &record.owner).await {
            Ok(_) => true,
            Err(e) => {
                warn!(file_id = %record.id, error = %e, "Record cleanup failed");
                false
            }
        }
    }

    /// Purge files still pending after `older_than`.
    ///
    /// Recovers from ingests interrupted by a crash, where no compensating
    /// delete ran.
    pub async fn sweep_pending(&self, older_than: Duration) -> Result<SweepReport> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| Error::Validation(format!("Invalid sweep age: {}", e)))?;
        let cutoff = Utc::now() - age;

        let mut report = SweepReport::default();
        for record in self.records.list_pending_files(cutoff).await? {
            let path = match self
                .records
                .find_location(&record.location_id, &record.owner)
                .await
            {
                Ok(Some(location)) => Some(blob_path(&location, &record)?),
                Ok(None) => None,
                Err(e) => {
                    warn!(file_id = %record.id, error = %e, "Location lookup failed during sweep");
                    report.retained += 1;
                    continue;
                }
            };

            if self.purge(&record, path.as_ref()).await {
                report.removed += 1;
            } else {
                report.retained += 1;
            }
        }

        if report.removed > 0 || report.retained > 0 {
            info!(
                removed = report.removed,
                retained = report.retained,
                "Pending file sweep finished"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{fixture, request};
    use super::*;
    use crate::records::RecordStore;
    use corecloud_storage::BlobStore;

    #[tokio::test]
    async fn test_sweep_removes_stale_pending() {
        let fx = fixture().await;
        let cursor = fx
            .engine
            .begin_ingest(&fx.owner, request(&fx, b"abandoned"), &fx.wk)
            .await
            .unwrap();
        let path = cursor.path().clone();
        // Simulate a crash: the cursor is dropped without commit or abort
        drop(cursor);
        assert_eq!(fx.records.file_count(), 1);

        let report = fx.engine.sweep_pending(Duration::ZERO).await.unwrap();
        assert_eq!(report, SweepReport { removed: 1, retained: 0 });
        assert_eq!(fx.records.file_count(), 0);
        assert!(!fx.blobs.exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_respects_grace_period() {
        let fx = fixture().await;
        let _cursor = fx
            .engine
            .begin_ingest(&fx.owner, request(&fx, b"in flight"), &fx.wk)
            .await
            .unwrap();

        let report = fx
            .engine
            .sweep_pending(Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(fx.records.file_count(), 1);
    }

    #[tokio::test]
    async fn test_sweep_treats_missing_blob_as_clean() {
        let fx = fixture().await;
        let cursor = fx
            .engine
            .begin_ingest(&fx.owner, request(&fx, b"gone"), &fx.wk)
            .await
            .unwrap();
        let (id, path) = (cursor.file_id(), cursor.path().clone());
        drop(cursor);
        fx.blobs.delete(&path).await.unwrap();

        let report = fx.engine.sweep_pending(Duration::ZERO).await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(fx.records.find_file(&id, &fx.owner).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sweep_ignores_committed() {
        let fx = fixture().await;
        let data = b"keep me";
        fx.engine
            .ingest_stream(
                &fx.owner,
                request(&fx, data),
                &fx.wk,
                super::super::tests::body(data, 3),
            )
            .await
            .unwrap();

        let report = fx.engine.sweep_pending(Duration::ZERO).await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(fx.records.file_count(), 1);
        assert_eq!(fx.blobs.blob_count(), 1);
    }
}
