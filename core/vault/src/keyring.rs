//! Key hierarchy management.
//!
//! Turns passwords into account keys, account keys into the master key,
//! and the master key into the session wrapping key that callers hold.
//! Neither the opened master key nor the wrapping key is ever persisted.

use std::sync::Arc;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::records::{AccountKeyRecord, RecordStore};
use corecloud_common::{Error, OwnerId, Result};
use corecloud_crypto::{
    derive_key, unwrap_key, verify_login, wrap_key, AccountKey, DataKey, KdfParams, MasterKey,
    Salt, WrappingKey,
};

/// Key hierarchy manager for all accounts in one record store.
#[derive(Clone)]
pub struct KeyHierarchy {
    records: Arc<dyn RecordStore>,
    kdf: KdfParams,
}

impl KeyHierarchy {
    /// Create a manager with fixed derivation cost parameters.
    pub fn new(records: Arc<dyn RecordStore>, kdf: KdfParams) -> Self {
        Self { records, kdf }
    }

    /// Derive an account key from a password. Runs on the blocking pool.
    pub async fn derive_account_key(&self, password: &[u8], salt: &Salt) -> Result<AccountKey> {
        let password = Zeroizing::new(password.to_vec());
        let salt = salt.clone();
        let params = self.kdf.clone();
        tokio::task::spawn_blocking(move || derive_key(&password, &salt, &params))
            .await
            .map_err(|e| Error::Crypto(format!("Key derivation task failed: {}", e)))?
    }

    /// Create the key material of a new account.
    ///
    /// # Postconditions
    /// - A fresh master key is persisted sealed under the master password
    /// - A login verifier is persisted under a second, distinct salt
    ///
    /// # Errors
    /// - `Error::Validation` if either password is empty or the account exists
    pub async fn provision_account(
        &self,
        owner: &OwnerId,
        login_password: &[u8],
        master_password: &[u8],
    ) -> Result<()> {
        if self.records.find_account(owner).await?.is_some() {
            return Err(Error::Validation(format!(
                "Account already provisioned: {}",
                owner
            )));
        }

        let login_salt = Salt::generate();
        let master_salt = Salt::generate();
        let verifier = self.derive_account_key(login_password, &login_salt).await?;
        let account_key = self.derive_account_key(master_password, &master_salt).await?;

        let master_key = MasterKey::generate();
        let sealed_master_key = account_key.seal_master_key(&master_key)?;

        let record = AccountKeyRecord {
            owner: owner.clone(),
            login_salt,
            login_verifier: verifier.as_bytes().to_vec(),
            master_salt,
            sealed_master_key,
        };
        self.records.insert_account(&record).await?;

        info!(owner = %owner, "Account provisioned");
        Ok(())
    }

    /// Check a login password against the stored verifier.
    ///
    /// # Errors
    /// - `Error::NotFound` if the owner has no account
    pub async fn verify_login(&self, owner: &OwnerId, login_password: &[u8]) -> Result<bool> {
        let record = self.account(owner).await?;
        let password = Zeroizing::new(login_password.to_vec());
        let params = self.kdf.clone();
        tokio::task::spawn_blocking(move || {
            verify_login(
                &password,
                &record.login_salt,
                &params,
                &record.login_verifier,
            )
        })
        .await
        .map_err(|e| Error::Crypto(format!("Key derivation task failed: {}", e)))?
    }

    /// Open an account's sealed master key with its master password.
    ///
    /// # Errors
    /// - `Error::NotFound` if the owner has no account
    /// - `Error::Crypto` if the password is wrong or the sealed key was tampered with
    pub async fn unlock_master_key(
        &self,
        owner: &OwnerId,
        master_password: &[u8],
    ) -> Result<MasterKey> {
        let record = self.account(owner).await?;
        let account_key = self
            .derive_account_key(master_password, &record.master_salt)
            .await?;
        let master_key = account_key.open_master_key(&record.sealed_master_key)?;

        debug!(owner = %owner, "Master key unlocked");
        Ok(master_key)
    }

    /// Derive the session wrapping key handed to the caller.
    pub fn issue_session_wrapping_key(&self, master_key: &MasterKey) -> Result<WrappingKey> {
        master_key.session_wrapping_key()
    }

    /// Unlock the master key and immediately derive the session wrapping key.
    ///
    /// The master key is dropped (and zeroized) before this returns.
    pub async fn open_session(
        &self,
        owner: &OwnerId,
        master_password: &[u8],
    ) -> Result<WrappingKey> {
        let master_key = self.unlock_master_key(owner, master_password).await?;
        self.issue_session_wrapping_key(&master_key)
    }

    async fn account(&self, owner: &OwnerId) -> Result<AccountKeyRecord> {
        self.records
            .find_account(owner)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Account not found: {}", owner)))
    }
}

/// Wrap a data key under the caller's wrapping key.
pub fn wrap_dek(dek: &DataKey, wrapping_key: &WrappingKey) -> Result<Vec<u8>> {
    wrap_key(dek, wrapping_key)
}

/// Unwrap a stored data key.
///
/// # Errors
/// - `Error::Crypto` on a wrong wrapping key or a tampered wrapped key
pub fn unwrap_dek(wrapped: &[u8], wrapping_key: &WrappingKey) -> Result<DataKey> {
    unwrap_key(wrapped, wrapping_key)
}
