//! The digest algebra.
//!
//! A [`Tree`] is an ordered map of normalised relative paths to file nodes.
//! Every operation here is pure: it consumes trees and produces a new tree,
//! which the [`Store`](crate::Store) then encodes and fingerprints.

use crate::digest::{Digest, Fingerprint};
use crate::error::{ErrorKind, Result};
use crate::path::{validate as validate_path, validate_prefix};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Canonical manifest of the tree with no files.
pub(crate) const EMPTY_MANIFEST: &[u8] = br#"{"files":{}}"#;

pub(crate) static EMPTY_DIGEST: LazyLock<Digest> =
    LazyLock::new(|| Digest::new(Fingerprint::of(EMPTY_MANIFEST), EMPTY_MANIFEST.len() as u64));

/// A file inside a tree: its content blob plus the executable bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileNode {
    pub content: Fingerprint,
    pub size: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_executable: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    files: BTreeMap<PathBuf, FileNode>,
}
impl Tree {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&FileNode> {
        self.files.get(path.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &FileNode)> {
        self.files.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.keys()
    }

    /// Adds a file, normalising its path.
    ///
    /// Re-inserting an identical node is a no-op. A different node at the same
    /// path, or a file that would shadow a directory (`a` next to `a/b`), is a
    /// [`PathConflict`](ErrorKind::PathConflict).
    pub fn insert(&mut self, path: impl AsRef<Path>, node: FileNode) -> Result<()> {
        let path = validate_path(path.as_ref())?;
        if path.to_str().is_none() {
            exn::bail!(ErrorKind::InvalidPath(path));
        }
        if let Some(existing) = self.files.get(&path) {
            if *existing == node {
                return Ok(());
            }
            exn::bail!(ErrorKind::PathConflict(path));
        }
        if let Some(ancestor) = path.ancestors().skip(1).find(|a| self.files.contains_key(*a)) {
            exn::bail!(ErrorKind::PathConflict(ancestor.to_path_buf()));
        }
        // Component-wise ordering keeps every descendant of `path` directly after it.
        if let Some((descendant, _)) =
            self.files.range::<Path, _>((Bound::Excluded(path.as_path()), Bound::Unbounded)).next()
            && descendant.starts_with(&path)
        {
            exn::bail!(ErrorKind::PathConflict(path));
        }
        self.files.insert(path, node);
        Ok(())
    }

    /// Sets the executable bit of an existing file.
    pub fn mark_executable(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = validate_path(path.as_ref())?;
        match self.files.get_mut(&path) {
            Some(node) => {
                node.is_executable = true;
                Ok(())
            },
            None => exn::bail!(ErrorKind::NotFound(path)),
        }
    }

    /// Union of several trees.
    ///
    /// The result depends only on the set of inputs, never on their order.
    pub fn merge<'a>(trees: impl IntoIterator<Item = &'a Tree>) -> Result<Tree> {
        let mut merged = Tree::default();
        for tree in trees {
            for (path, node) in &tree.files {
                merged.insert(path, *node)?;
            }
        }
        Ok(merged)
    }

    /// Re-roots every path under `prefix`.
    pub fn with_prefix(&self, prefix: impl AsRef<Path>) -> Result<Tree> {
        let Some(prefix) = validate_prefix(prefix.as_ref())? else {
            return Ok(self.clone());
        };
        let files = self.files.iter().map(|(path, node)| (prefix.join(path), *node)).collect();
        Ok(Tree { files })
    }

    /// Inverse of [`with_prefix`](Self::with_prefix). Every path must live
    /// strictly below `prefix`.
    pub fn without_prefix(&self, prefix: impl AsRef<Path>) -> Result<Tree> {
        let Some(prefix) = validate_prefix(prefix.as_ref())? else {
            return Ok(self.clone());
        };
        let mut files = BTreeMap::new();
        for (path, node) in &self.files {
            match path.strip_prefix(&prefix) {
                Ok(stripped) if !stripped.as_os_str().is_empty() => {
                    files.insert(stripped.to_path_buf(), *node);
                },
                _ => exn::bail!(ErrorKind::PrefixNotFound { prefix, path: path.clone() }),
            }
        }
        Ok(Tree { files })
    }

    /// Canonical manifest bytes and the digest that identifies them.
    pub fn encode(&self) -> Result<(Digest, Vec<u8>)> {
        let bytes = serde_json::to_vec(self).or_raise(|| ErrorKind::Encode)?;
        let digest = Digest::new(Fingerprint::of(&bytes), bytes.len() as u64);
        Ok((digest, bytes))
    }

    pub fn decode(fingerprint: Fingerprint, bytes: &[u8]) -> Result<Tree> {
        serde_json::from_slice(bytes).or_raise(|| ErrorKind::Corrupt(fingerprint))
    }
}
