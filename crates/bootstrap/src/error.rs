//! Bootstrap Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A bootstrap error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for bootstrap operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Clone, Debug, Display, Error)]
pub enum ErrorKind {
    /// The downloaded distribution is not the one that was pinned. Never
    /// retried: using it anyway would run unverified code.
    #[display("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch { url: String, expected: String, actual: String },
    /// No `known_versions` row matches the requested version and platform.
    #[display("no known version of {name} {version} for {platform}")]
    UnknownVersion { name: String, version: String, platform: String },
    #[display("unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },
    /// A `known_versions` row is not `version|platform|sha256|size`.
    #[display("invalid known version row: {_0:?}")]
    InvalidKnownVersion(#[error(not(source))] String),
    #[display("failed to download {_0}")]
    Download(#[error(not(source))] String),
    /// The distribution's self-extraction process failed.
    #[display("failed to extract {_0}")]
    Extraction(#[error(not(source))] String),
    /// The extracted tree lacks the tool's executable.
    #[display("extracted tool is missing its executable: {}", _0.display())]
    MissingExecutable(#[error(not(source))] PathBuf),
    #[display("failed to resolve binaries required for extraction")]
    Binaries,
    #[display("content store failure")]
    Store,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Download(_))
    }
}
