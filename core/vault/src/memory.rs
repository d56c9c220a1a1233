//! In-memory record store for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::records::{
    AccountKeyRecord, FileFilter, FileRecord, FileState, LocationRecord, RecordStore,
    SecretRecord,
};
use corecloud_common::{Error, FileId, LocationId, OwnerId, Result, SecretId};

#[derive(Default)]
struct Inner {
    accounts: HashMap<OwnerId, AccountKeyRecord>,
    locations: HashMap<LocationId, LocationRecord>,
    secrets: HashMap<SecretId, SecretRecord>,
    files: HashMap<FileId, FileRecord>,
}

/// In-memory record store.
///
/// Writes can be switched off to simulate an unavailable database.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<RwLock<Inner>>,
    reject_writes: Arc<AtomicBool>,
}

impl MemoryRecordStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `Error::Database`.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Number of file records in any state.
    pub fn file_count(&self) -> usize {
        self.inner.read().map(|inner| inner.files.len()).unwrap_or(0)
    }

    /// Number of secret records.
    pub fn secret_count(&self) -> usize {
        self.inner.read().map(|inner| inner.secrets.len()).unwrap_or(0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| Error::Database("record store poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(Error::Database("record store unavailable".to_string()));
        }
        self.inner
            .write()
            .map_err(|_| Error::Database("record store poisoned".to_string()))
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert_account(&self, record: &AccountKeyRecord) -> Result<()> {
        let mut inner = self.write()?;
        if inner.accounts.contains_key(&record.owner) {
            return Err(Error::Validation(format!(
                "Account already provisioned: {}",
                record.owner
            )));
        }
        inner.accounts.insert(record.owner.clone(), record.clone());
        Ok(())
    }

    async fn find_account(&self, owner: &OwnerId) -> Result<Option<AccountKeyRecord>> {
        Ok(self.read()?.accounts.get(owner).cloned())
    }

    async fn insert_location(&self, record: &LocationRecord) -> Result<()> {
        self.write()?.locations.insert(record.id, record.clone());
        Ok(())
    }

    async fn find_location(
        &self,
        id: &LocationId,
        owner: &OwnerId,
    ) -> Result<Option<LocationRecord>> {
        Ok(self
            .read()?
            .locations
            .get(id)
            .filter(|l| l.owner == *owner)
            .cloned())
    }

    async fn insert_secret(&self, record: &SecretRecord) -> Result<()> {
        self.write()?.secrets.insert(record.id, record.clone());
        Ok(())
    }

    async fn find_secret(&self, id: &SecretId, owner: &OwnerId) -> Result<Option<SecretRecord>> {
        Ok(self
            .read()?
            .secrets
            .get(id)
            .filter(|s| s.owner == *owner)
            .cloned())
    }

    async fn list_secrets(&self, owner: &OwnerId) -> Result<Vec<SecretRecord>> {
        let mut secrets: Vec<SecretRecord> = self
            .read()?
            .secrets
            .values()
            .filter(|s| s.owner == *owner)
            .cloned()
            .collect();
        secrets.sort_by_key(|s| s.created_at);
        Ok(secrets)
    }

    async fn delete_secret(&self, id: &SecretId, owner: &OwnerId) -> Result<bool> {
        let mut inner = self.write()?;
        match inner.secrets.get(id) {
            Some(s) if s.owner == *owner => Ok(inner.secrets.remove(id).is_some()),
            _ => Ok(false),
        }
    }

    async fn insert_file(&self, record: &FileRecord) -> Result<()> {
        self.write()?.files.insert(record.id, record.clone());
        Ok(())
    }

    async fn find_file(&self, id: &FileId, owner: &OwnerId) -> Result<Option<FileRecord>> {
        Ok(self
            .read()?
            .files
            .get(id)
            .filter(|f| f.owner == *owner)
            .cloned())
    }

    async fn list_files(&self, owner: &OwnerId, filter: &FileFilter) -> Result<Vec<FileRecord>> {
        let mut files: Vec<FileRecord> = self
            .read()?
            .files
            .values()
            .filter(|f| f.owner == *owner && f.is_committed() && filter.matches(f))
            .cloned()
            .collect();
        files.sort_by_key(|f| f.created_at);
        Ok(files)
    }

    async fn mark_file_committed(&self, id: &FileId, owner: &OwnerId) -> Result<()> {
        let mut inner = self.write()?;
        match inner.files.get_mut(id) {
            Some(f) if f.owner == *owner && f.state == FileState::Pending => {
                f.state = FileState::Committed;
                Ok(())
            }
            _ => Err(Error::NotFound(format!("Pending file not found: {}", id))),
        }
    }

    async fn delete_file(&self, id: &FileId, owner: &OwnerId) -> Result<bool> {
        let mut inner = self.write()?;
        match inner.files.get(id) {
            Some(f) if f.owner == *owner => Ok(inner.files.remove(id).is_some()),
            _ => Ok(false),
        }
    }

    async fn list_pending_files(&self, before: DateTime<Utc>) -> Result<Vec<FileRecord>> {
        Ok(self
            .read()?
            .files
            .values()
            .filter(|f| f.state == FileState::Pending && f.created_at < before)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::conformance;

    #[tokio::test]
    async fn test_memory_conformance() {
        let store = MemoryRecordStore::new();
        conformance::run(&store).await;
    }

    #[tokio::test]
    async fn test_memory_reject_writes() {
        let store = MemoryRecordStore::new();
        let owner = OwnerId::new("alice").unwrap();
        store.set_reject_writes(true);

        let record = conformance::file_record(&owner);
        assert!(matches!(
            store.insert_file(&record).await,
            Err(Error::Database(_))
        ));
        assert_eq!(store.file_count(), 0);

        store.set_reject_writes(false);
        store.insert_file(&record).await.unwrap();
        assert_eq!(store.file_count(), 1);
    }
}
