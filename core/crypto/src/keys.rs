//! Key types with secure memory handling.
//!
//! The hierarchy is:
//! - [`AccountKey`]: derived from the master password, opens the sealed master key
//! - [`MasterKey`]: random per account, persisted only sealed under the account key
//! - [`WrappingKey`]: derived from the master key, handed to the caller and never stored
//! - [`DataKey`]: random per secret or file, persisted only wrapped under a wrapping key
//!
//! All key types zeroize their memory on drop and redact themselves in `Debug`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::aead::{open, seal};
use corecloud_common::{Error, Result};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of KDF salts in bytes.
pub const SALT_LENGTH: usize = 32;

/// HKDF context label for session wrapping keys.
const SESSION_KEY_INFO: &[u8] = b"app-token";

fn random_bytes() -> [u8; KEY_LENGTH] {
    let mut key = [0u8; KEY_LENGTH];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

fn key_from_slice(kind: &str, bytes: &[u8]) -> Result<[u8; KEY_LENGTH]> {
    bytes.try_into().map_err(|_| {
        Error::Crypto(format!(
            "Invalid {} length: expected {}, got {}",
            kind,
            KEY_LENGTH,
            bytes.len()
        ))
    })
}

/// Key derived from the account's master password.
///
/// Only ever used to seal and open the [`MasterKey`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccountKey {
    key: [u8; KEY_LENGTH],
}

impl AccountKey {
    /// Create an account key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Seal a master key for persistence.
    pub fn seal_master_key(&self, master: &MasterKey) -> Result<Vec<u8>> {
        seal(&self.key, master.as_bytes())
    }

    /// Open a sealed master key.
    ///
    /// # Errors
    /// - `Error::Crypto` if the tag does not verify (wrong password or tampered box)
    pub fn open_master_key(&self, sealed: &[u8]) -> Result<MasterKey> {
        let opened = Zeroizing::new(open(&self.key, sealed)?);
        Ok(MasterKey::from_bytes(key_from_slice("master key", &opened)?))
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountKey([REDACTED])")
    }
}

/// Per-account master key.
///
/// This key is the root of the wrapping hierarchy. It exists in the clear
/// only while a caller is proving elevated trust.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; KEY_LENGTH],
}

impl MasterKey {
    /// Create a master key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Generate a random master key.
    pub fn generate() -> Self {
        Self { key: random_bytes() }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Derive the session wrapping key.
    ///
    /// HKDF-SHA512 with no salt and a constant context label: the same
    /// master key always yields the same wrapping key.
    pub fn session_wrapping_key(&self) -> Result<WrappingKey> {
        let hk = Hkdf::<Sha512>::new(None, &self.key);
        let mut okm = [0u8; KEY_LENGTH];
        hk.expand(SESSION_KEY_INFO, &mut okm)
            .map_err(|e| Error::Crypto(format!("Session key derivation failed: {}", e)))?;
        Ok(WrappingKey::from_bytes(okm))
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

/// Key-encryption key used only to wrap and unwrap data keys.
///
/// Held by the authenticated caller as a bearer value.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct WrappingKey {
    key: [u8; KEY_LENGTH],
}

impl WrappingKey {
    /// Create a wrapping key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Decode a wrapping key presented by a caller.
    ///
    /// # Errors
    /// - `Error::Auth` if the value is not base64 or has the wrong length
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = Zeroizing::new(
            STANDARD
                .decode(encoded.trim())
                .map_err(|_| Error::Auth("Malformed wrapping key".to_string()))?,
        );
        let key: [u8; KEY_LENGTH] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| Error::Auth("Malformed wrapping key".to_string()))?;
        Ok(Self { key })
    }

    /// Encode for handing back to the caller.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.key)
    }
}

impl fmt::Debug for WrappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WrappingKey([REDACTED])")
    }
}

/// Data-encryption key, generated fresh for every secret and file.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataKey {
    key: [u8; KEY_LENGTH],
}

impl DataKey {
    /// Create a data key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Generate a random data key.
    pub fn generate() -> Self {
        Self { key: random_bytes() }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataKey([REDACTED])")
    }
}

/// Wrap a data key under a wrapping key.
pub fn wrap_key(dek: &DataKey, wrapping_key: &WrappingKey) -> Result<Vec<u8>> {
    seal(wrapping_key.as_bytes(), dek.as_bytes())
}

/// Unwrap a data key.
///
/// # Errors
/// - `Error::Crypto` on tag mismatch or a malformed wrapped blob
pub fn unwrap_key(wrapped: &[u8], wrapping_key: &WrappingKey) -> Result<DataKey> {
    let opened = Zeroizing::new(open(wrapping_key.as_bytes(), wrapped)?);
    Ok(DataKey::from_bytes(key_from_slice("data key", &opened)?))
}

/// Salt for key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(pub [u8; SALT_LENGTH]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        let mut salt = [0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Create from a stored slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let salt = bytes
            .try_into()
            .map_err(|_| Error::Serialization(format!("Invalid salt length: {}", bytes.len())))?;
        Ok(Self(salt))
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}
