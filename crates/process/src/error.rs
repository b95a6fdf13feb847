//! Process Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;
use std::time::Duration;

/// A process error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for process operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("process request has an empty argv")]
    EmptyArgv,
    /// The request itself is malformed (bad output path, nested mounts).
    #[display("invalid process request: {_0}")]
    InvalidRequest(#[error(not(source))] String),
    /// The program named in argv is in neither the input digest nor a mount.
    #[display("process input not found: {}", _0.display())]
    MissingInput(#[error(not(source))] PathBuf),
    /// The process exited successfully but did not write a declared output.
    #[display("declared output was not produced: {}", _0.display())]
    MissingDeclaredOutput(#[error(not(source))] PathBuf),
    /// The process exited with a non-zero status.
    #[display(
        "process `{description}` failed with exit code {exit_code}\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(stdout),
        String::from_utf8_lossy(stderr)
    )]
    ProcessExecutionFailure { description: String, exit_code: i32, stdout: Vec<u8>, stderr: Vec<u8> },
    #[display("process `{description}` timed out after {}s", timeout.as_secs_f32())]
    Timeout { description: String, timeout: Duration },
    /// The program could not be started at all.
    #[display("failed to spawn `{_0}`")]
    Spawn(#[error(not(source))] String),
    #[display("content store failure")]
    Store,
    #[display("process cache failure")]
    Cache,
    #[display("I/O error: {_0}")]
    Io(std::io::Error),
}
impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// Failures of the process itself are terminal; retrying is left to
    /// whoever schedules the build.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_includes_captured_output() {
        let err = ErrorKind::ProcessExecutionFailure {
            description: "Build makeself archive".to_string(),
            exit_code: 2,
            stdout: b"partial".to_vec(),
            stderr: b"tar: not found".to_vec(),
        };
        let message = err.to_string();
        assert!(message.contains("exit code 2"));
        assert!(message.contains("partial"));
        assert!(message.contains("tar: not found"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn timeout_display() {
        let err = ErrorKind::Timeout { description: "sleep".to_string(), timeout: Duration::from_millis(1500) };
        assert_eq!(err.to_string(), "process `sleep` timed out after 1.5s");
    }
}
