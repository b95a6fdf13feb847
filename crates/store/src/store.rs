//! The content store.
//!
//! A [`Store`] owns every [`Digest`] it hands out: file contents and tree
//! manifests are blobs in a [`BlobBackend`], and a digest is simply the
//! fingerprint of a tree manifest. All operations are pure functions from
//! digests to digests; the only shared state is the insert-if-absent blob
//! backend.

use crate::backend::{BlobBackend, LocalBackend, MemoryBackend};
use crate::digest::{Digest, FileContent, Snapshot};
use crate::error::{ErrorKind, Result};
use crate::tree::{FileNode, Tree};
use crate::{BlobHandle, fs};
use futures::{StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;

/// Number of blobs read or written at the same time when moving trees
/// between the store and disk.
const CONCURRENT_FILES: usize = 16;

struct Inner {
    blobs: BlobHandle,
    root: Option<PathBuf>,
}

/// Cheap to clone; clones share the same backend.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}
impl Store {
    pub fn new(blobs: BlobHandle) -> Self {
        Self::with_root(blobs, None)
    }

    fn with_root(blobs: BlobHandle, root: Option<PathBuf>) -> Self {
        Self { inner: Arc::new(Inner { blobs, root }) }
    }

    /// A store that lives only as long as this process.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::default()))
    }

    /// A persistent store rooted at `root`. Blobs live in `root/blobs`;
    /// other crates may keep their own state alongside (see [`root`](Self::root)).
    pub fn local(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let blobs = LocalBackend::new("local", root.join("blobs"))?;
        Ok(Self::with_root(Arc::new(blobs), Some(root)))
    }

    /// Root directory of a persistent store, `None` for in-memory stores.
    pub fn root(&self) -> Option<&Path> {
        self.inner.root.as_deref()
    }

    pub fn backend(&self) -> &BlobHandle {
        &self.inner.blobs
    }

    /// Builds a digest from in-memory files.
    #[instrument(skip_all, fields(backend = self.inner.blobs.name()))]
    pub async fn create_digest(&self, files: impl IntoIterator<Item = FileContent>) -> Result<Digest> {
        let files: Vec<FileContent> = files.into_iter().collect();
        let blobs = Arc::clone(&self.inner.blobs);
        let nodes = futures::stream::iter(files)
            .map(move |file| {
                let blobs = Arc::clone(&blobs);
                async move {
                    let content = blobs.write(&file.content).await?;
                    let node = FileNode { content, size: file.content.len() as u64, is_executable: file.is_executable };
                    Ok::<_, crate::error::Error>((file.path, node))
                }
            })
            .buffer_unordered(CONCURRENT_FILES)
            .try_collect::<Vec<_>>()
            .await?;
        let mut tree = Tree::default();
        for (path, node) in nodes {
            tree.insert(path, node)?;
        }
        self.store_tree(tree).await
    }

    /// Encodes and stores a tree, returning its digest.
    pub async fn store_tree(&self, tree: Tree) -> Result<Digest> {
        let (digest, bytes) = tree.encode()?;
        self.inner.blobs.write(&bytes).await?;
        Ok(digest)
    }

    /// Resolves a digest back into its tree, reading the manifest from the
    /// backend.
    pub async fn tree(&self, digest: &Digest) -> Result<Arc<Tree>> {
        if digest.is_empty() {
            return Ok(Arc::new(Tree::default()));
        }
        let bytes = self.inner.blobs.read(&digest.fingerprint).await?;
        if bytes.len() as u64 != digest.size {
            exn::bail!(ErrorKind::Corrupt(digest.fingerprint));
        }
        Ok(Arc::new(Tree::decode(digest.fingerprint, &bytes)?))
    }

    /// Union of several digests.
    ///
    /// Fails with [`PathConflict`](ErrorKind::PathConflict) when two inputs
    /// disagree about the same path. The result does not depend on the order
    /// of the inputs.
    #[instrument(skip_all, fields(count = tracing::field::Empty))]
    pub async fn merge(&self, digests: impl IntoIterator<Item = Digest>) -> Result<Digest> {
        let mut digests: Vec<Digest> = digests.into_iter().filter(|d| !d.is_empty()).collect();
        digests.sort();
        digests.dedup();
        tracing::Span::current().record("count", digests.len());
        match digests.as_slice() {
            [] => return Ok(Digest::empty()),
            [single] => return Ok(*single),
            _ => {},
        }
        let trees = futures::future::try_join_all(digests.iter().map(|d| self.tree(d))).await?;
        let merged = Tree::merge(trees.iter().map(|t| &**t))?;
        self.store_tree(merged).await
    }

    /// Re-roots every path of `digest` under `prefix`.
    pub async fn add_prefix(&self, digest: Digest, prefix: impl AsRef<Path>) -> Result<Digest> {
        let tree = self.tree(&digest).await?;
        self.store_tree(tree.with_prefix(prefix)?).await
    }

    /// Sets the executable bit of `path` inside `digest`.
    pub async fn mark_executable(&self, digest: Digest, path: impl AsRef<Path>) -> Result<Digest> {
        let mut tree = Tree::clone(&*self.tree(&digest).await?);
        tree.mark_executable(path)?;
        self.store_tree(tree).await
    }

    /// Strips `prefix` from every path of `digest`.
    ///
    /// Fails with [`PrefixNotFound`](ErrorKind::PrefixNotFound) when any path
    /// lies outside `prefix`.
    pub async fn remove_prefix(&self, digest: Digest, prefix: impl AsRef<Path>) -> Result<Digest> {
        let tree = self.tree(&digest).await?;
        self.store_tree(tree.without_prefix(prefix)?).await
    }

    pub async fn snapshot(&self, digest: Digest) -> Result<Snapshot> {
        let tree = self.tree(&digest).await?;
        Ok(Snapshot { digest, files: tree.paths().cloned().collect() })
    }

    /// Reads every file of a digest into memory, in path order.
    pub async fn extract_contents(&self, digest: Digest) -> Result<Vec<FileContent>> {
        let tree = self.tree(&digest).await?;
        let reads = tree.iter().map(|(path, node)| {
            let (blobs, path, node) = (Arc::clone(&self.inner.blobs), path.clone(), *node);
            async move {
                let content = blobs.read(&node.content).await?;
                Ok::<_, crate::error::Error>(FileContent::new(path, content).executable(node.is_executable))
            }
        });
        futures::future::try_join_all(reads).await
    }

    /// Writes the files of `digest` below `dir`.
    ///
    /// With `read_only`, files lose their write permission; directories are
    /// left writable so the caller can still clean up.
    #[instrument(skip(self, dir), fields(dir = %dir.display()))]
    pub async fn materialize(&self, digest: Digest, dir: &Path, read_only: bool) -> Result<()> {
        let tree = self.tree(&digest).await?;
        tokio::fs::create_dir_all(dir).await.map_err(ErrorKind::Io)?;
        let entries: Vec<(PathBuf, FileNode)> = tree.iter().map(|(path, node)| (path.clone(), *node)).collect();
        let (blobs, dir) = (Arc::clone(&self.inner.blobs), dir.to_path_buf());
        futures::stream::iter(entries)
            .map(move |(path, node)| {
                let (blobs, dir) = (Arc::clone(&blobs), dir.clone());
                async move {
                    let content = blobs.read(&node.content).await?;
                    fs::write_file(&dir, &path, &content, node.is_executable, read_only).await
                }
            })
            .buffer_unordered(CONCURRENT_FILES)
            .try_collect::<()>()
            .await
    }

    /// Snapshots declared paths below `root` into the store.
    ///
    /// Every declared file and directory must exist, otherwise this fails with
    /// [`NotFound`](ErrorKind::NotFound). Directories are captured
    /// recursively; nothing outside the declared paths is read.
    #[instrument(skip(self, root), fields(root = %root.display()))]
    pub async fn capture(&self, root: &Path, files: &[PathBuf], directories: &[PathBuf]) -> Result<Digest> {
        let mut paths = Vec::with_capacity(files.len());
        for file in files {
            paths.push(crate::path::validate(file)?);
        }
        for dir in directories {
            let dir = crate::path::validate(dir)?;
            fs::require_dir(root, &dir).await?;
            let found: Vec<PathBuf> = fs::walk(root.to_path_buf(), dir).try_collect().await?;
            paths.extend(found);
        }
        paths.sort();
        paths.dedup();
        let root = root.to_path_buf();
        let contents = futures::stream::iter(paths)
            .map(move |path| {
                let root = root.clone();
                async move { fs::read_file(&root, &path).await }
            })
            .buffer_unordered(CONCURRENT_FILES)
            .try_collect::<Vec<_>>()
            .await?;
        self.create_digest(contents).await
    }

    /// Whether the tree and every blob it refers to are present.
    pub async fn contains(&self, digest: &Digest) -> Result<bool> {
        if digest.is_empty() {
            return Ok(true);
        }
        if !self.inner.blobs.exists(&digest.fingerprint).await? {
            return Ok(false);
        }
        let tree = self.tree(digest).await?;
        for (_, node) in tree.iter() {
            if !self.inner.blobs.exists(&node.content).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
