//! Fixed-size window sealing for streamed blobs.
//!
//! A blob is the concatenation of independently sealed windows. Every window
//! except the last holds exactly `W` plaintext bytes, so window `i` always
//! begins at physical offset `i * (W + SEAL_OVERHEAD)`. Each window is
//! authenticated on its own; a byte sub-range of a window can only be read by
//! opening the whole window.
//!
//! Every window's tag also covers its [`WindowPosition`], so a window cannot
//! be moved to another index, another file, or in or out of the final slot.

use crate::aead::{open_with_aad, seal_with_aad, SEAL_OVERHEAD};
use crate::keys::DataKey;
use corecloud_common::{Error, FileId, Result};

/// Default plaintext window size (4 MiB).
pub const DEFAULT_WINDOW_SIZE: u64 = 4 * 1024 * 1024;

/// Length of the associated data bound into each window.
const POSITION_LEN: usize = 16 + 8 + 1;

/// Where a window sits in its blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPosition {
    pub file_id: FileId,
    pub index: u64,
    /// Whether this is the final window of the file.
    pub last: bool,
}

impl WindowPosition {
    pub fn new(file_id: FileId, index: u64, last: bool) -> Self {
        Self {
            file_id,
            index,
            last,
        }
    }

    /// `file_id || index (u64 BE) || last (u8)`
    fn aad(&self) -> [u8; POSITION_LEN] {
        let mut aad = [0u8; POSITION_LEN];
        aad[..16].copy_from_slice(self.file_id.as_uuid().as_bytes());
        aad[16..24].copy_from_slice(&self.index.to_be_bytes());
        aad[24] = u8::from(self.last);
        aad
    }
}

/// Sealed length of a window holding `plain_len` bytes.
pub fn sealed_window_len(plain_len: u64) -> u64 {
    plain_len + SEAL_OVERHEAD as u64
}

/// Physical byte range `[start, end)` of window `index` in a blob of `blob_len` bytes.
pub fn sealed_window_bounds(index: u64, window_size: u64, blob_len: u64) -> (u64, u64) {
    let stride = sealed_window_len(window_size);
    let start = index.saturating_mul(stride);
    let end = start.saturating_add(stride).min(blob_len);
    (start.min(blob_len), end)
}

/// Seal one plaintext window with a file's data key.
pub fn seal_window(dek: &DataKey, position: &WindowPosition, window: &[u8]) -> Result<Vec<u8>> {
    seal_with_aad(dek.as_bytes(), window, &position.aad())
}

/// Open one sealed window.
///
/// # Errors
/// - `Error::Crypto` if the window fails authentication, including when it
///   was sealed at a different position
pub fn open_window(dek: &DataKey, position: &WindowPosition, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.is_empty() {
        return Err(Error::Crypto("Missing window".to_string()));
    }
    open_with_aad(dek.as_bytes(), sealed, &position.aad())
}
