//! Cryptographic primitives for CoreCloud.
//!
//! This module provides:
//! - Authenticated encryption using ChaCha20-Poly1305 (nonce || ciphertext || tag)
//! - Password-based key derivation using Argon2id with fixed cost parameters
//! - The key hierarchy types: account key, master key, session wrapping key
//!   and per-item data-encryption keys, all zeroized on drop
//! - Fixed-size window sealing for streamed blobs
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Constant-time comparison for login verifiers

pub mod aead;
pub mod kdf;
pub mod keys;
pub mod window;

pub use aead::{open, open_with_aad, seal, seal_with_aad, NONCE_SIZE, SEAL_OVERHEAD, TAG_SIZE};
pub use kdf::{derive_key, verify_login, KdfParams};
pub use keys::{unwrap_key, wrap_key, AccountKey, DataKey, MasterKey, Salt, WrappingKey, KEY_LENGTH};
pub use window::{
    open_window, seal_window, sealed_window_bounds, sealed_window_len, WindowPosition,
    DEFAULT_WINDOW_SIZE,
};
