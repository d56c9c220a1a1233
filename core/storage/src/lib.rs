//! Physical blob storage for CoreCloud.
//!
//! This module provides a trait-based interface for the byte stores that hold
//! sealed blobs, with a local filesystem backend and an in-memory backend.
//!
//! # Design Principles
//! - Backend isolation: no crypto or record logic in storage
//! - Async operations: all I/O operations are async
//! - Write-once blobs: a path is created, appended to, and later deleted,
//!   never rewritten
//! - Unified error semantics: consistent error types across backends

pub mod local;
pub mod memory;
pub mod provider;

pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;
pub use provider::{BlobStore, BlobWriter};
