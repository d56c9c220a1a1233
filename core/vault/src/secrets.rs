//! Encrypted secret store.
//!
//! Small single-shot secrets (credentials, one-time-code seeds), each sealed
//! under its own data key. Payloads are read rarely and never cached.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use crate::keyring::{unwrap_dek, wrap_dek};
use crate::records::{RecordStore, SecretKind, SecretRecord, SecretSummary};
use corecloud_common::{Error, OwnerId, Result, SecretId, SensitiveBytes};
use corecloud_crypto::{open, seal, DataKey, WrappingKey};

/// Plaintext metadata stored next to a sealed secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSecret {
    pub label: String,
    pub kind: SecretKind,
    pub username: Option<String>,
    pub notes: Option<String>,
}

impl NewSecret {
    /// Metadata for a secret of `kind` with no username or notes.
    pub fn new(label: impl Into<String>, kind: SecretKind) -> Self {
        Self {
            label: label.into(),
            kind,
            username: None,
            notes: None,
        }
    }
}

/// Secret store over a record store.
#[derive(Clone)]
pub struct SecretStore {
    records: Arc<dyn RecordStore>,
}

impl SecretStore {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// Seal and persist a secret.
    ///
    /// # Postconditions
    /// - A fresh data key seals the payload and is itself wrapped under
    ///   `wrapping_key`
    /// - Sealing completes before the record store is touched
    ///
    /// # Errors
    /// - `Error::Validation` if the label is empty
    /// - `Error::Database` if the record cannot be persisted
    pub async fn add_secret(
        &self,
        owner: &OwnerId,
        meta: NewSecret,
        payload: &[u8],
        wrapping_key: &WrappingKey,
    ) -> Result<SecretId> {
        if meta.label.trim().is_empty() {
            return Err(Error::Validation("Secret label cannot be empty".to_string()));
        }

        let dek = DataKey::generate();
        let wrapped_payload = seal(dek.as_bytes(), payload)?;
        let wrapped_dek = wrap_dek(&dek, wrapping_key)?;

        let record = SecretRecord {
            id: SecretId::generate(),
            owner: owner.clone(),
            label: meta.label,
            kind: meta.kind,
            username: meta.username,
            notes: meta.notes,
            wrapped_dek,
            wrapped_payload,
            created_at: Utc::now(),
        };
        self.records.insert_secret(&record).await?;

        info!(owner = %owner, secret_id = %record.id, kind = %record.kind, "Secret stored");
        Ok(record.id)
    }

    /// Open a stored secret.
    ///
    /// A crypto failure leaves the record untouched.
    ///
    /// # Errors
    /// - `Error::NotFound` if no such secret exists for `owner`
    /// - `Error::Crypto` if `wrapping_key` does not unwrap the data key
    pub async fn get_secret(
        &self,
        id: &SecretId,
        owner: &OwnerId,
        wrapping_key: &WrappingKey,
    ) -> Result<SensitiveBytes> {
        let record = self
            .records
            .find_secret(id, owner)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Secret not found: {}", id)))?;

        let dek = unwrap_dek(&record.wrapped_dek, wrapping_key)?;
        let payload = open(dek.as_bytes(), &record.wrapped_payload)?;

        debug!(owner = %owner, secret_id = %id, "Secret opened");
        Ok(SensitiveBytes::new(payload))
    }

    /// Summaries of an owner's secrets. Touches no key material.
    pub async fn list_secrets(&self, owner: &OwnerId) -> Result<Vec<SecretSummary>> {
        let records = self.records.list_secrets(owner).await?;
        Ok(records.iter().map(SecretSummary::from).collect())
    }

    /// Delete a secret.
    ///
    /// # Errors
    /// - `Error::NotFound` if no such secret exists for `owner`
    pub async fn delete_secret(&self, id: &SecretId, owner: &OwnerId) -> Result<()> {
        if !self.records.delete_secret(id, owner).await? {
            return Err(Error::NotFound(format!("Secret not found: {}", id)));
        }
        info!(owner = %owner, secret_id = %id, "Secret deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRecordStore;
    use corecloud_crypto::MasterKey;

    fn wrapping_key() -> WrappingKey {
        MasterKey::generate().session_wrapping_key().unwrap()
    }

    fn setup() -> (SecretStore, MemoryRecordStore, OwnerId) {
        let records = MemoryRecordStore::new();
        let store = SecretStore::new(Arc::new(records.clone()));
        (store, records, OwnerId::new("alice").unwrap())
    }

    #[tokio::test]
    async fn test_add_and_get_secret() {
        let (store, _, owner) = setup();
        let wk = wrapping_key();

        let mut meta = NewSecret::new("bank", SecretKind::Password);
        meta.username = Some("alice".to_string());
        let id = store
            .add_secret(&owner, meta, b"correct horse battery staple", &wk)
            .await
            .unwrap();

        let payload = store.get_secret(&id, &owner, &wk).await.unwrap();
        assert_eq!(payload.as_bytes(), b"correct horse battery staple");
    }

    #[tokio::test]
    async fn test_wrong_wrapping_key_keeps_record() {
        let (store, records, owner) = setup();
        let id = store
            .add_secret(
                &owner,
                NewSecret::new("seed", SecretKind::VerificationSeed),
                b"JBSWY3DPEHPK3PXP",
                &wrapping_key(),
            )
            .await
            .unwrap();

        assert!(matches!(
            store.get_secret(&id, &owner, &wrapping_key()).await,
            Err(Error::Crypto(_))
        ));
        assert_eq!(records.secret_count(), 1);
    }

    #[tokio::test]
    async fn test_other_owner_sees_not_found() {
        let (store, _, owner) = setup();
        let wk = wrapping_key();
        let id = store
            .add_secret(&owner, NewSecret::new("bank", SecretKind::Password), b"pw", &wk)
            .await
            .unwrap();

        let mallory = OwnerId::new("mallory").unwrap();
        assert!(matches!(
            store.get_secret(&id, &mallory, &wk).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.delete_secret(&id, &mallory).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_database_failure_persists_nothing() {
        let (store, records, owner) = setup();
        records.set_reject_writes(true);

        let result = store
            .add_secret(
                &owner,
                NewSecret::new("bank", SecretKind::Password),
                b"pw",
                &wrapping_key(),
            )
            .await;
        assert!(matches!(result, Err(Error::Database(_))));
        assert_eq!(records.secret_count(), 0);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let (store, _, owner) = setup();
        let wk = wrapping_key();
        let id = store
            .add_secret(&owner, NewSecret::new("bank", SecretKind::Password), b"pw", &wk)
            .await
            .unwrap();

        let listed = store.list_secrets(&owner).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].label, "bank");

        store.delete_secret(&id, &owner).await.unwrap();
        assert!(store.list_secrets(&owner).await.unwrap().is_empty());
        assert!(matches!(
            store.get_secret(&id, &owner, &wk).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_label_rejected() {
        let (store, _, owner) = setup();
        let result = store
            .add_secret(
                &owner,
                NewSecret::new("  ", SecretKind::Password),
                b"pw",
                &wrapping_key(),
            )
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
