//! Path validation for file trees.
//!
//! Every path held in a tree is relative to the tree root, normalised, and
//! never escapes the root. Sandboxes and materialised outputs rely on this.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a tree path for security and correctness.
/// Ensures that paths don't escape the tree root (no `..` traversal).
///
/// > **Note:** This does **not** normalize backslashes, non-UTF8 bytes, or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// # Returns
/// Returns the normalized path if valid, or [`InvalidPath`](crate::error::ErrorKind::InvalidPath)
/// if invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use sfx_store::validate_path;
/// // Valid paths
/// assert!(validate_path("src/shell/run.sh").is_ok());
/// assert!(validate_path("a/../file.txt").is_ok()); // (never leaves the root)
/// // Invalid paths
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a/../../b").is_err());
/// assert!(validate_path("a\0b").is_err());
/// // Paths get resolved
/// assert_eq!(
///     validate_path("wrong/../still-wrong/.././correct//./path.sh/").unwrap(),
///     Path::new("correct/path.sh")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    match normalize(path)? {
        Some(normalized) => Ok(normalized),
        None => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
    }
}

/// Same rules as [`validate`], except that a path pointing at the root itself
/// (`""`, `"."`, `"./"`) is accepted and returned as `None`.
///
/// Used for prefixes, where "no prefix" is a legitimate request.
pub fn validate_prefix(path: impl AsRef<Path>) -> Result<Option<PathBuf>> {
    normalize(path.as_ref())
}

fn normalize(path: &Path) -> Result<Option<PathBuf>> {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls, reject them explicitly.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir => {},
            // Tree paths are always relative to the tree root.
            Component::RootDir | Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => Ok(None),
        false => Ok(Some(components.into_iter().collect())),
    }
}
