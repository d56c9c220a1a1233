//! Shared handler state.

use std::sync::Arc;
use tracing::info;

use crate::auth::{Authenticator, TokenAuthenticator};
use crate::config::ServerConfig;
use corecloud_common::Result;
use corecloud_storage::{BlobStore, LocalBlobStore};
use corecloud_vault::{KeyHierarchy, RecordStore, SecretStore, SqliteRecordStore, TransferEngine};

/// Everything a request handler needs. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub engine: TransferEngine,
    pub keys: KeyHierarchy,
    pub secrets: SecretStore,
    pub auth: Arc<dyn Authenticator>,
    pub secure_cookies: bool,
}

impl AppState {
    /// Assemble state over explicit collaborators.
    pub fn new(
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        auth: Arc<dyn Authenticator>,
        config: &ServerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine: TransferEngine::new(records.clone(), blobs, config.window_size)?,
            keys: KeyHierarchy::new(records.clone(), config.kdf.clone()),
            secrets: SecretStore::new(records),
            auth,
            secure_cookies: config.secure_cookies,
        })
    }

    /// Open the SQLite record store and local blob store named by `config`.
    pub fn open(config: &ServerConfig) -> Result<Self> {
        let records = Arc::new(SqliteRecordStore::open(&config.database)?);
        let blobs = Arc::new(LocalBlobStore::new(&config.storage_root)?);
        let auth = Arc::new(TokenAuthenticator::new(config.tokens.clone()));

        info!(
            database = %config.database.display(),
            storage_root = %config.storage_root.display(),
            window_size = config.window_size,
            "Server state opened"
        );
        Self::new(records, blobs, auth, config)
    }
}
