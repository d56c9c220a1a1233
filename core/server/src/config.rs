//! Server configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use corecloud_common::{Error, OwnerId, Result};
use corecloud_crypto::{KdfParams, DEFAULT_WINDOW_SIZE};

/// Configuration for a CoreCloud server instance, stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub listen: String,
    /// SQLite database path, or `:memory:`.
    pub database: PathBuf,
    /// Directory holding every location's blobs.
    pub storage_root: PathBuf,
    /// Plaintext window size for new files.
    pub window_size: u64,
    /// Argon2id parameters for account keys.
    pub kdf: KdfParams,
    /// Bearer token to owner map for the bundled authenticator.
    pub tokens: BTreeMap<String, OwnerId>,
    /// Age after which a pending file is swept.
    pub pending_grace_secs: u64,
    /// Mark the session cookie `Secure` and `SameSite=Lax`.
    pub secure_cookies: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            database: PathBuf::from("corecloud.db"),
            storage_root: PathBuf::from("data"),
            window_size: DEFAULT_WINDOW_SIZE,
            kdf: KdfParams::interactive(),
            tokens: BTreeMap::new(),
            pending_grace_secs: 3600,
            secure_cookies: false,
        }
    }
}

impl ServerConfig {
    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Read and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the server cannot run with.
    ///
    /// # Errors
    /// - `Error::Validation` for a zero window size, an empty listen address
    ///   or an empty bearer token
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(Error::Validation("Window size must be non-zero".to_string()));
        }
        if self.listen.trim().is_empty() {
            return Err(Error::Validation("Listen address cannot be empty".to_string()));
        }
        if self.tokens.keys().any(|token| token.trim().is_empty()) {
            return Err(Error::Validation("Bearer tokens cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn pending_grace(&self) -> Duration {
        Duration::from_secs(self.pending_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.window_size, 4 * 1024 * 1024);
        assert_eq!(config.pending_grace(), Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ServerConfig::from_json(
            r#"{"listen": "0.0.0.0:9000", "database": ":memory:", "tokens": {"t0k3n": "alice"}}"#,
        )
        .unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.database, PathBuf::from(":memory:"));
        assert_eq!(config.window_size, DEFAULT_WINDOW_SIZE);
        assert_eq!(config.tokens["t0k3n"].as_str(), "alice");
    }

    #[test]
    fn test_json_roundtrip() {
        let mut config = ServerConfig::default();
        config.window_size = 1024;
        config
            .tokens
            .insert("abc".to_string(), OwnerId::new("bob").unwrap());

        let restored = ServerConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_rejects_empty_owner() {
        let result = ServerConfig::from_json(r#"{"tokens": {"abc": ""}}"#);
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn test_validate() {
        let mut config = ServerConfig::default();
        config.window_size = 0;
        assert!(matches!(config.validate(), Err(Error::Validation(_))));

        let mut config = ServerConfig::default();
        config.listen = " ".to_string();
        assert!(matches!(config.validate(), Err(Error::Validation(_))));

        let mut config = ServerConfig::default();
        config
            .tokens
            .insert(String::new(), OwnerId::new("bob").unwrap());
        assert!(matches!(config.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, r#"{"window_size": 0}"#).unwrap();
        assert!(matches!(
            ServerConfig::load(&path),
            Err(Error::Validation(_))
        ));

        std::fs::write(&path, r#"{"window_size": 65536}"#).unwrap();
        assert_eq!(ServerConfig::load(&path).unwrap().window_size, 65536);

        assert!(matches!(
            ServerConfig::load(dir.path().join("missing.json")),
            Err(Error::Io(_))
        ));
    }
}
