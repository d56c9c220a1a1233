//! Record types and the record store collaborator.
//!
//! Records carry only sealed key material and declared metadata. Nothing
//! in this module can read file content or secret payloads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use corecloud_common::{
    Category, Error, FileId, LocationId, OwnerId, Result, SecretId, StoragePath,
};
use corecloud_crypto::Salt;

/// Per-account key material, persisted only in sealed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountKeyRecord {
    pub owner: OwnerId,
    /// Salt for the login verifier derivation.
    pub login_salt: Salt,
    /// Argon2id output of the login password.
    pub login_verifier: Vec<u8>,
    /// Salt for the account key that seals the master key.
    pub master_salt: Salt,
    pub sealed_master_key: Vec<u8>,
}

/// What a stored secret is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretKind {
    /// A stored credential.
    Password,
    /// A one-time-code seed.
    VerificationSeed,
}

impl SecretKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretKind::Password => "password",
            SecretKind::VerificationSeed => "verification-seed",
        }
    }
}

impl FromStr for SecretKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "password" => Ok(SecretKind::Password),
            "verification-seed" => Ok(SecretKind::VerificationSeed),
            other => Err(Error::Validation(format!("Unknown secret kind: {}", other))),
        }
    }
}

impl fmt::Display for SecretKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A small secret sealed under its own data key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRecord {
    pub id: SecretId,
    pub owner: OwnerId,
    pub label: String,
    pub kind: SecretKind,
    pub username: Option<String>,
    pub notes: Option<String>,
    pub wrapped_dek: Vec<u8>,
    pub wrapped_payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Listing view of a secret. Carries no key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSummary {
    pub id: SecretId,
    pub label: String,
    pub kind: SecretKind,
    pub username: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&SecretRecord> for SecretSummary {
    fn from(record: &SecretRecord) -> Self {
        Self {
            id: record.id,
            label: record.label.clone(),
            kind: record.kind,
            username: record.username.clone(),
            created_at: record.created_at,
        }
    }
}

/// Two-phase commit state of a file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    /// Created at ingest start; invisible to retrieval and listing.
    Pending,
    /// Blob fully written and verified against the declared metadata.
    Committed,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::Pending => "pending",
            FileState::Committed => "committed",
        }
    }
}

impl FromStr for FileState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(FileState::Pending),
            "committed" => Ok(FileState::Committed),
            other => Err(Error::Serialization(format!("Unknown file state: {}", other))),
        }
    }
}

/// Declared metadata and wrapped key of one stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: FileId,
    pub owner: OwnerId,
    pub name: String,
    pub kind: String,
    /// Declared plaintext size in bytes.
    pub size: u64,
    /// Declared SHA-512 digest of the plaintext.
    pub checksum: Vec<u8>,
    pub category: Category,
    pub location_id: LocationId,
    pub wrapped_dek: Vec<u8>,
    /// Plaintext window size the blob was sealed with.
    pub window_size: u64,
    pub state: FileState,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn is_committed(&self) -> bool {
        self.state == FileState::Committed
    }
}

/// Listing view of a committed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub id: FileId,
    pub name: String,
    pub kind: String,
    pub size: u64,
    pub category: Category,
    pub location_id: LocationId,
    pub created_at: DateTime<Utc>,
}

impl From<&FileRecord> for FileSummary {
    fn from(record: &FileRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            kind: record.kind.clone(),
            size: record.size,
            category: record.category.clone(),
            location_id: record.location_id,
            created_at: record.created_at,
        }
    }
}

/// A storage location: the root under which an owner's blobs are namespaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationRecord {
    pub id: LocationId,
    pub owner: OwnerId,
    /// Root relative to the physical store.
    pub root: StoragePath,
}

/// Optional narrowing for file listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileFilter {
    pub category: Option<Category>,
    pub location_id: Option<LocationId>,
    /// Exact match on the client-declared kind.
    pub kind: Option<String>,
}

impl FileFilter {
    pub fn matches(&self, record: &FileRecord) -> bool {
        self.category.as_ref().map_or(true, |c| *c == record.category)
            && self.location_id.map_or(true, |l| l == record.location_id)
            && self.kind.as_ref().map_or(true, |k| *k == record.kind)
    }
}

/// Record store collaborator.
///
/// Every lookup is keyed by id and owner: a record belonging to another
/// owner is indistinguishable from a missing one.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist account key material.
    ///
    /// # Errors
    /// - `Error::Validation` if the owner already has an account record
    async fn insert_account(&self, record: &AccountKeyRecord) -> Result<()>;

    async fn find_account(&self, owner: &OwnerId) -> Result<Option<AccountKeyRecord>>;

    async fn insert_location(&self, record: &LocationRecord) -> Result<()>;

    async fn find_location(
        &self,
        id: &LocationId,
        owner: &OwnerId,
    ) -> Result<Option<LocationRecord>>;

    async fn insert_secret(&self, record: &SecretRecord) -> Result<()>;

    async fn find_secret(&self, id: &SecretId, owner: &OwnerId) -> Result<Option<SecretRecord>>;

    async fn list_secrets(&self, owner: &OwnerId) -> Result<Vec<SecretRecord>>;

    /// Delete a secret. Returns whether a record was removed.
    async fn delete_secret(&self, id: &SecretId, owner: &OwnerId) -> Result<bool>;

    async fn insert_file(&self, record: &FileRecord) -> Result<()>;

    /// Find a file record in any state.
    async fn find_file(&self, id: &FileId, owner: &OwnerId) -> Result<Option<FileRecord>>;

    /// List committed files matching `filter`, oldest first.
    async fn list_files(&self, owner: &OwnerId, filter: &FileFilter) -> Result<Vec<FileRecord>>;

    /// Flip a pending record to committed.
    ///
    /// # Errors
    /// - `Error::NotFound` if no pending record exists
    async fn mark_file_committed(&self, id: &FileId, owner: &OwnerId) -> Result<()>;

    /// Delete a file record. Returns whether a record was removed.
    async fn delete_file(&self, id: &FileId, owner: &OwnerId) -> Result<bool>;

    /// Pending records of every owner created before `before`.
    async fn list_pending_files(&self, before: DateTime<Utc>) -> Result<Vec<FileRecord>>;
}

/// Behaviour every [`RecordStore`] implementation must show.
#[cfg(test)]
pub(crate) mod conformance {
    use super::*;
    use chrono::Duration;

    /// Current time at the millisecond precision stores persist.
    pub fn now() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap()
    }

    pub fn file_record(owner: &OwnerId) -> FileRecord {
        FileRecord {
            id: FileId::generate(),
            owner: owner.clone(),
            name: "track.m4a".to_string(),
            kind: "Apple MPEG-4 Audio".to_string(),
            size: 1234,
            checksum: vec![7u8; 64],
            category: Category::new("music").unwrap(),
            location_id: LocationId::generate(),
            wrapped_dek: vec![1, 2, 3],
            window_size: 4096,
            state: FileState::Pending,
            created_at: now(),
        }
    }

    fn secret_record(owner: &OwnerId, label: &str) -> SecretRecord {
        SecretRecord {
            id: SecretId::generate(),
            owner: owner.clone(),
            label: label.to_string(),
            kind: SecretKind::Password,
            username: Some("alice@example.com".to_string()),
            notes: None,
            wrapped_dek: vec![4, 5, 6],
            wrapped_payload: vec![7, 8, 9],
            created_at: now(),
        }
    }

    pub async fn run(store: &dyn RecordStore) {
        let alice = OwnerId::new("alice").unwrap();
        let mallory = OwnerId::new("mallory").unwrap();

        // Accounts
        let account = AccountKeyRecord {
            owner: alice.clone(),
            login_salt: Salt::from_bytes([1u8; 32]),
            login_verifier: vec![9u8; 32],
            master_salt: Salt::from_bytes([2u8; 32]),
            sealed_master_key: vec![3u8; 60],
        };
        store.insert_account(&account).await.unwrap();
        assert!(matches!(
            store.insert_account(&account).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(store.find_account(&alice).await.unwrap(), Some(account));
        assert_eq!(store.find_account(&mallory).await.unwrap(), None);

        // Locations are owner scoped
        let location = LocationRecord {
            id: LocationId::generate(),
            owner: alice.clone(),
            root: StoragePath::parse("/disk1").unwrap(),
        };
        store.insert_location(&location).await.unwrap();
        assert_eq!(
            store.find_location(&location.id, &alice).await.unwrap(),
            Some(location.clone())
        );
        assert_eq!(store.find_location(&location.id, &mallory).await.unwrap(), None);

        // Secrets
        let first = secret_record(&alice, "bank");
        let second = secret_record(&alice, "mail");
        store.insert_secret(&first).await.unwrap();
        store.insert_secret(&second).await.unwrap();
        assert_eq!(
            store.find_secret(&first.id, &alice).await.unwrap(),
            Some(first.clone())
        );
        assert_eq!(store.find_secret(&first.id, &mallory).await.unwrap(), None);
        assert_eq!(store.list_secrets(&alice).await.unwrap().len(), 2);
        assert!(store.list_secrets(&mallory).await.unwrap().is_empty());
        assert!(!store.delete_secret(&first.id, &mallory).await.unwrap());
        assert!(store.delete_secret(&first.id, &alice).await.unwrap());
        assert!(!store.delete_secret(&first.id, &alice).await.unwrap());

        // Files: pending records are hidden from listings
        let mut file = file_record(&alice);
        file.location_id = location.id;
        store.insert_file(&file).await.unwrap();
        assert!(store
            .list_files(&alice, &FileFilter::default())
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store.find_file(&file.id, &alice).await.unwrap().map(|f| f.state),
            Some(FileState::Pending)
        );

        let later = Utc::now() + Duration::seconds(60);
        let pending = store.list_pending_files(later).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0], file);
        assert!(store
            .list_pending_files(file.created_at - Duration::seconds(60))
            .await
            .unwrap()
            .is_empty());

        assert!(matches!(
            store.mark_file_committed(&file.id, &mallory).await,
            Err(Error::NotFound(_))
        ));
        store.mark_file_committed(&file.id, &alice).await.unwrap();
        assert!(matches!(
            store.mark_file_committed(&file.id, &alice).await,
            Err(Error::NotFound(_))
        ));
        assert!(store.list_pending_files(later).await.unwrap().is_empty());

        let listed = store
            .list_files(
                &alice,
                &FileFilter {
                    category: Some(Category::new("music").unwrap()),
                    location_id: Some(location.id),
                    kind: Some(file.kind.clone()),
                },
            )
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, file.id);
        assert_eq!(listed[0].size, file.size);
        assert_eq!(listed[0].checksum, file.checksum);
        assert!(store
            .list_files(
                &alice,
                &FileFilter {
                    category: Some(Category::new("drive").unwrap()),
                    ..FileFilter::default()
                },
            )
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .list_files(
                &alice,
                &FileFilter {
                    kind: Some("Plain Text".to_string()),
                    ..FileFilter::default()
                },
            )
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .list_files(&mallory, &FileFilter::default())
            .await
            .unwrap()
            .is_empty());

        assert!(!store.delete_file(&file.id, &mallory).await.unwrap());
        assert!(store.delete_file(&file.id, &alice).await.unwrap());
        assert_eq!(store.find_file(&file.id, &alice).await.unwrap(), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(category: &str, location_id: LocationId) -> FileRecord {
        FileRecord {
            id: FileId::generate(),
            owner: OwnerId::new("alice").unwrap(),
            name: "song.m4a".to_string(),
            kind: "Apple MPEG-4 Audio".to_string(),
            size: 10,
            checksum: vec![0u8; 64],
            category: Category::new(category).unwrap(),
            location_id,
            wrapped_dek: Vec::new(),
            window_size: 16,
            state: FileState::Pending,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_secret_kind_names() {
        assert_eq!("password".parse::<SecretKind>().unwrap(), SecretKind::Password);
        assert_eq!(SecretKind::VerificationSeed.to_string(), "verification-seed");
        assert_eq!(
            serde_json::to_string(&SecretKind::VerificationSeed).unwrap(),
            "\"verification-seed\""
        );
        assert!(matches!(
            "pin".parse::<SecretKind>(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_file_filter() {
        let loc = LocationId::generate();
        let music = record("music", loc);

        assert!(FileFilter::default().matches(&music));
        assert!(FileFilter {
            category: Some(Category::new("music").unwrap()),
            location_id: Some(loc),
            kind: Some("Apple MPEG-4 Audio".to_string()),
        }
        .matches(&music));
        assert!(!FileFilter {
            category: Some(Category::new("drive").unwrap()),
            ..FileFilter::default()
        }
        .matches(&music));
        assert!(!FileFilter {
            location_id: Some(LocationId::generate()),
            ..FileFilter::default()
        }
        .matches(&music));
        assert!(!FileFilter {
            kind: Some("MPEG-4 Movie".to_string()),
            ..FileFilter::default()
        }
        .matches(&music));
    }

    #[test]
    fn test_file_state_roundtrip() {
        for state in [FileState::Pending, FileState::Committed] {
            assert_eq!(state.as_str().parse::<FileState>().unwrap(), state);
        }
    }
}
