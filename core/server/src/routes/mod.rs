//! HTTP handlers, one module per resource.

pub mod files;
pub mod secrets;
pub mod tokens;
pub mod upload;
