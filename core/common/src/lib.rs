//! Common utilities and types shared across CoreCloud modules.
//!
//! This module provides the error taxonomy used by every layer of the
//! transfer engine, plus the identifier and path newtypes that keep owner,
//! category and storage namespaces from being mixed up.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Category, FileId, LocationId, OwnerId, SecretId, SensitiveBytes, StoragePath};
