//! Byte ranges over plaintext and their mapping onto sealed windows.

use corecloud_common::{Error, Result};

/// A single requested byte range, before it is checked against a file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `A-B`, both inclusive.
    Bounded { start: u64, end: u64 },
    /// `A-`, from `A` to the end.
    From { start: u64 },
    /// `-N`, the last `N` bytes.
    Suffix { len: u64 },
}

impl RangeSpec {
    /// Parse an HTTP `Range` header value.
    ///
    /// # Errors
    /// - `Error::Validation` for a unit other than `bytes`, multiple ranges,
    ///   or a malformed range
    pub fn parse_header(value: &str) -> Result<Self> {
        let spec = value
            .trim()
            .strip_prefix("bytes=")
            .ok_or_else(|| Error::Validation(format!("Unsupported range unit: {}", value)))?;
        if spec.contains(',') {
            return Err(Error::Validation(
                "Multiple ranges are not supported".to_string(),
            ));
        }
        Self::parse(spec)
    }

    /// Parse a bare range such as `"0-9"`, `"10-"` or `"-5"`.
    pub fn parse(spec: &str) -> Result<Self> {
        let malformed = || Error::Validation(format!("Malformed range: {}", spec));
        let number = |s: &str| s.trim().parse::<u64>().map_err(|_| malformed());

        let (start, end) = spec.trim().split_once('-').ok_or_else(malformed)?;
        match (start.trim(), end.trim()) {
            ("", "") => Err(malformed()),
            ("", len) => Ok(RangeSpec::Suffix { len: number(len)? }),
            (start, "") => Ok(RangeSpec::From {
                start: number(start)?,
            }),
            (start, end) => Ok(RangeSpec::Bounded {
                start: number(start)?,
                end: number(end)?,
            }),
        }
    }

    /// Resolve against a file of `size` plaintext bytes.
    ///
    /// A suffix longer than the file selects the whole file.
    ///
    /// # Errors
    /// - `Error::RangeNotSatisfiable` if any bound falls outside the file,
    ///   `start > end`, the suffix is empty, or the file is empty
    pub fn resolve(&self, size: u64) -> Result<ByteRange> {
        let unsatisfiable = Err(Error::RangeNotSatisfiable { size });
        if size == 0 {
            return unsatisfiable;
        }
        match *self {
            RangeSpec::Bounded { start, end } => {
                if start > end || start >= size || end >= size {
                    return unsatisfiable;
                }
                Ok(ByteRange { start, end })
            }
            RangeSpec::From { start } => {
                if start >= size {
                    return unsatisfiable;
                }
                Ok(ByteRange {
                    start,
                    end: size - 1,
                })
            }
            RangeSpec::Suffix { len } => {
                if len == 0 {
                    return unsatisfiable;
                }
                Ok(ByteRange {
                    start: size.saturating_sub(len),
                    end: size - 1,
                })
            }
        }
    }
}

/// A resolved, non-empty, inclusive plaintext range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

#[allow(clippy::len_without_is_empty)]
impl ByteRange {
    /// The whole of a non-empty file.
    pub fn full(size: u64) -> Option<Self> {
        size.checked_sub(1).map(|end| Self { start: 0, end })
    }

    /// Number of bytes selected.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` header value.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Which windows a range touches and where to trim them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlan {
    pub first_window: u64,
    pub last_window: u64,
    /// Offset of the range start inside the first window.
    pub first_offset: u64,
    /// Offset of the range end (inclusive) inside the last window.
    pub last_offset: u64,
}

impl WindowPlan {
    pub fn new(range: ByteRange, window_size: u64) -> Self {
        let first_window = range.start / window_size;
        let last_window = range.end / window_size;
        Self {
            first_window,
            last_window,
            first_offset: range.start - first_window * window_size,
            last_offset: range.end - last_window * window_size,
        }
    }

    /// Number of windows to open.
    pub fn window_count(&self) -> u64 {
        self.last_window - self.first_window + 1
    }

    /// Slice of an opened window that belongs to the range.
    ///
    /// # Errors
    /// - `Error::Storage` if the window is shorter than the recorded layout
    pub fn trim<'a>(&self, index: u64, window: &'a [u8]) -> Result<&'a [u8]> {
        let from = if index == self.first_window {
            self.first_offset as usize
        } else {
            0
        };
        let to = if index == self.last_window {
            self.last_offset as usize + 1
        } else {
            window.len()
        };
        window.get(from..to).ok_or_else(|| {
            Error::Storage(format!(
                "Window {} holds {} bytes, expected at least {}",
                index,
                window.len(),
                to
            ))
        })
    }
}
