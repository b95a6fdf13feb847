//! Store Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use crate::Fingerprint;
use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Two trees disagree on the content of the same path (or one tree has a
    /// file where the other has a directory).
    #[display("path conflict: {}", _0.display())]
    PathConflict(#[error(not(source))] PathBuf),
    /// A path in the tree does not live under the prefix being removed.
    #[display("prefix {} not found on path {}", prefix.display(), path.display())]
    PrefixNotFound { prefix: PathBuf, path: PathBuf },
    /// Path contains invalid characters or escapes the tree root.
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// A declared path does not exist on disk.
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// The store holds no blob for this fingerprint.
    #[display("unknown digest: {_0}")]
    UnknownDigest(#[error(not(source))] Fingerprint),
    /// A stored blob does not hash to its key, or a tree blob failed to parse.
    #[display("corrupt blob: {_0}")]
    Corrupt(#[error(not(source))] Fingerprint),
    /// A tree manifest could not be serialized (non UTF-8 path).
    #[display("failed to encode tree manifest")]
    Encode,
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
