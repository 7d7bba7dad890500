//! Error taxonomy of the public API surface.

use core::fmt::{Display, Formatter};

/// Everything a public CSX operation can fail with.
///
/// Internal invariant violations (oversized ctl units, exhausted pattern
/// ids, a values-cursor mismatch at finalize) are programming faults and
/// abort via `assert!` instead of surfacing here.
#[derive(Debug)]
pub enum SparseError {
    /// Malformed matrix-market input or inconsistent CSR arrays.
    InputMatrix(String),
    /// Invalid argument: empty dimension, out-of-bounds index, size
    /// mismatch.
    ArgInvalid(&'static str),
    /// Get/Set addressed a structurally-zero element.
    EntryNotFound,
    /// Unknown option mnemonic or a value outside its domain.
    ConfigInvalid(String),
    /// The encoding pipeline could not honor the request.
    Encoding(String),
    /// Save/restore file error.
    Io(std::io::Error),
}

impl Display for SparseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            SparseError::InputMatrix(msg) => write!(f, "invalid input matrix: {msg}"),
            SparseError::ArgInvalid(msg) => write!(f, "invalid argument: {msg}"),
            SparseError::EntryNotFound => write!(f, "entry not found"),
            SparseError::ConfigInvalid(msg) => write!(f, "invalid configuration: {msg}"),
            SparseError::Encoding(msg) => write!(f, "encoding failed: {msg}"),
            SparseError::Io(err) => write!(f, "i/o error: {err}"),
        }
    }
}

impl std::error::Error for SparseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SparseError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SparseError {
    fn from(err: std::io::Error) -> SparseError {
        SparseError::Io(err)
    }
}

pub type Result<T> = core::result::Result<T, SparseError>;
