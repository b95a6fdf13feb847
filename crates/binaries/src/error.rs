//! Binary Resolver Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A binary resolution error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for binary resolution.
pub type Result<T> = std::result::Result<T, Error>;

fn join_paths(paths: &[PathBuf]) -> String {
    paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(":")
}

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No directory on the search path holds an executable with this name.
    /// Install it, or extend `binaries.search_paths`.
    #[display("could not find binary `{name}` in {}", join_paths(search_path))]
    BinaryNotFound { name: String, search_path: Vec<PathBuf> },
    /// Two different executables were requested under the same shim name.
    #[display("conflicting binaries requested for shim `{name}`: {} and {}", first.display(), second.display())]
    ShimConflict { name: String, first: PathBuf, second: PathBuf },
    /// Binary names are looked up on the search path, never as paths.
    #[display("invalid binary name: {_0:?}")]
    InvalidName(#[error(not(source))] String),
    #[display("content store failure")]
    Store,
    #[display("I/O error: {_0}")]
    Io(std::io::Error),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_lists_the_search_path() {
        let err = ErrorKind::BinaryNotFound {
            name: "gzip".to_string(),
            search_path: vec![PathBuf::from("/usr/bin"), PathBuf::from("/bin")],
        };
        assert_eq!(err.to_string(), "could not find binary `gzip` in /usr/bin:/bin");
        assert!(!err.is_retryable());
    }
}
