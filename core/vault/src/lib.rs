//! Encrypted object transfer engine for CoreCloud.
//!
//! This crate provides:
//! - The record store collaborator with SQLite and in-memory backends
//! - Key hierarchy management (account, master, wrapping and data keys)
//! - An encrypted store for small secrets
//! - Chunked, integrity-checked, range-addressable encrypted file transfer
//!
//! # Architecture
//! The engine sits between the HTTP surface and the physical blob store.
//! It never holds a caller's wrapping key beyond a single request.

pub mod keyring;
pub mod memory;
pub mod records;
pub mod secrets;
pub mod sqlite;
pub mod transfer;

pub use keyring::{unwrap_dek, wrap_dek, KeyHierarchy};
pub use memory::MemoryRecordStore;
pub use records::{
    AccountKeyRecord, FileFilter, FileRecord, FileState, FileSummary, LocationRecord,
    RecordStore, SecretKind, SecretRecord, SecretSummary,
};
pub use secrets::{NewSecret, SecretStore};
pub use sqlite::SqliteRecordStore;
pub use transfer::{
    content_type, decode_checksum, ByteRange, IngestCursor, IngestRequest, RangeSpec,
    Retrieval, SweepReport, TransferEngine,
};
