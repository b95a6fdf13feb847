//! Makeself Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Clone, Debug, Display, Error)]
pub enum ErrorKind {
    /// Two inputs of the archive disagree on the content of the same path.
    #[display("conflicting content for {} while assembling the archive", _0.display())]
    ArchiveAssemblyConflict(#[error(not(source))] PathBuf),
    /// The startup script must resolve to exactly one file.
    #[display("startup script {reference:?} resolved to {count} files, expected exactly one")]
    InvalidStartupScript { reference: String, count: usize },
    /// Makeself produced something other than the single declared archive.
    #[display("expected makeself to produce exactly one file, got {_0}")]
    UnexpectedOutput(#[error(not(source))] usize),
    /// An archive ends up packaging itself.
    #[display("archive dependency cycle: {}", _0.join(" -> "))]
    DependencyCycle(#[error(not(source))] Vec<String>),
    #[display("invalid archive request: {_0}")]
    InvalidRequest(#[error(not(source))] String),
    #[display("invalid output path template")]
    Template,
    #[display("unknown archive: {_0}")]
    UnknownArchive(#[error(not(source))] String),
    #[display("failed to resolve source {_0:?}")]
    Source(#[error(not(source))] String),
    #[display("failed to build package {_0:?}")]
    Package(#[error(not(source))] String),
    #[display("failed to bootstrap makeself")]
    Bootstrap,
    #[display("failed to resolve binaries for {_0}")]
    Binaries(#[error(not(source))] String),
    #[display("makeself process failed")]
    Process,
    #[display("content store failure")]
    Store,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// Archive failures are terminal here; a retry belongs to whoever
    /// schedules the build.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
