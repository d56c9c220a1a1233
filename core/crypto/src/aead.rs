//! Authenticated encryption using ChaCha20-Poly1305.
//!
//! A sealed box is `nonce || ciphertext || tag`, with a 12-byte random nonce
//! and a 16-byte Poly1305 tag. Opening verifies the tag before any plaintext
//! is released.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng, Payload},
    ChaCha20Poly1305,
};

use crate::keys::KEY_LENGTH;
use corecloud_common::{Error, Result};

/// Nonce size for ChaCha20-Poly1305 (12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Bytes a sealed box adds on top of its plaintext.
pub const SEAL_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

fn cipher(key: &[u8]) -> Result<ChaCha20Poly1305> {
    if key.len() != KEY_LENGTH {
        return Err(Error::Crypto(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LENGTH,
            key.len()
        )));
    }
    Ok(ChaCha20Poly1305::new(GenericArray::from_slice(key)))
}

/// Seal plaintext under a symmetric key.
///
/// # Postconditions
/// - Returns nonce || ciphertext || tag
/// - The nonce is freshly generated from the OS RNG
/// - The output length is plaintext length + SEAL_OVERHEAD
///
/// # Errors
/// - Returns error if key length is incorrect
/// - Returns error if encryption fails
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    seal_with_aad(key, plaintext, &[])
}

/// Seal plaintext, authenticating `aad` alongside it.
///
/// `aad` is not stored in the box; the same bytes must be presented to
/// [`open_with_aad`]. An empty `aad` is equivalent to [`seal`].
pub fn seal_with_aad(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher(key)?;
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Open a sealed box.
///
/// # Preconditions
/// - `sealed` is at least SEAL_OVERHEAD bytes: nonce || encrypted_data || tag
///
/// # Errors
/// - Returns error if key length is incorrect
/// - Returns error if the sealed box is too short
/// - Returns error if authentication fails (tampered data or wrong key)
pub fn open(key: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    open_with_aad(key, sealed, &[])
}

/// Open a box sealed by [`seal_with_aad`].
///
/// # Errors
/// - Everything [`open`] rejects, plus any difference in `aad`
pub fn open_with_aad(key: &[u8], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher(key)?;

    if sealed.len() < SEAL_OVERHEAD {
        return Err(Error::Crypto("Sealed box too short".to_string()));
    }

    let (nonce_bytes, encrypted) = sealed.split_at(NONCE_SIZE);
    let nonce = GenericArray::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, Payload { msg: encrypted, aad })
        .map_err(|_| Error::Crypto("Authentication failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Hello, World!";

        let sealed = seal(&key, plaintext).unwrap();
        let opened = open(&key, &sealed).unwrap();

        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_sealed_size() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Test message";

        let sealed = seal(&key, plaintext).unwrap();

        assert_eq!(sealed.len(), plaintext.len() + 28);
    }

    #[test]
    fn test_different_nonce_each_time() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Same plaintext";

        let s1 = seal(&key, plaintext).unwrap();
        let s2 = seal(&key, plaintext).unwrap();

        assert_ne!(&s1[..NONCE_SIZE], &s2[..NONCE_SIZE]);
        assert_ne!(s1, s2);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = [1u8; KEY_LENGTH];
        let key2 = [2u8; KEY_LENGTH];

        let sealed = seal(&key1, b"Secret data").unwrap();
        assert!(matches!(open(&key2, &sealed), Err(Error::Crypto(_))));
    }

    #[test]
    fn test_tamper_anywhere_fails() {
        let key = [42u8; KEY_LENGTH];
        let sealed = seal(&key, b"Important data").unwrap();

        for i in 0..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[i] ^= 0x01;
            assert!(open(&key, &tampered).is_err(), "bit flip at {} accepted", i);
        }
    }

    #[test]
    fn test_truncated_fails() {
        let key = [42u8; KEY_LENGTH];
        let sealed = seal(&key, b"data").unwrap();

        assert!(open(&key, &sealed[..SEAL_OVERHEAD - 1]).is_err());
        assert!(open(&key, &sealed[..sealed.len() - 1]).is_err());
    }

    #[test]
    fn test_aad_must_match() {
        let key = [42u8; KEY_LENGTH];
        let sealed = seal_with_aad(&key, b"data", b"context a").unwrap();

        assert_eq!(open_with_aad(&key, &sealed, b"context a").unwrap(), b"data");
        assert!(open_with_aad(&key, &sealed, b"context b").is_err());
        assert!(open(&key, &sealed).is_err());

        let plain = seal(&key, b"data").unwrap();
        assert_eq!(open_with_aad(&key, &plain, &[]).unwrap(), b"data");
    }

    #[test]
    fn test_invalid_key_length() {
        let short_key = [0u8; 16];
        assert!(seal(&short_key, b"data").is_err());
    }

    #[test]
    fn test_empty_plaintext() {
        let key = [42u8; KEY_LENGTH];

        let sealed = seal(&key, b"").unwrap();
        assert_eq!(sealed.len(), SEAL_OVERHEAD);
        assert!(open(&key, &sealed).unwrap().is_empty());
    }
}
