use crate::error::{ErrorKind, Result};
use crate::package::{BuiltPackage, PackageBuilder, SourceResolver};
use async_trait::async_trait;
use exn::ResultExt;
use sfx_store::{Snapshot, Store, validate_path};
use std::path::{Path, PathBuf};

/// Resolves references as files or directories below a workspace root.
///
/// A file reference yields that file; a directory reference yields every
/// file below it. Paths keep their workspace-relative form.
#[derive(Clone)]
pub struct WorkspaceSources {
    store: Store,
    root: PathBuf,
}
impl WorkspaceSources {
    pub fn new(store: Store, root: impl Into<PathBuf>) -> Self {
        Self { store, root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl SourceResolver for WorkspaceSources {
    #[tracing::instrument(skip(self))]
    async fn resolve(&self, reference: &str) -> Result<Snapshot> {
        let source = || ErrorKind::Source(reference.to_string());
        let path = validate_path(reference).or_raise(source)?;
        let metadata = tokio::fs::metadata(self.root.join(&path)).await.or_raise(source)?;
        let (files, directories) = if metadata.is_dir() { (vec![], vec![path]) } else { (vec![path], vec![]) };
        let digest = self.store.capture(&self.root, &files, &directories).await.or_raise(source)?;
        self.store.snapshot(digest).await.or_raise(|| ErrorKind::Store)
    }
}

/// Pre-built packages are plain workspace paths.
#[async_trait]
impl PackageBuilder for WorkspaceSources {
    async fn build(&self, reference: &str) -> Result<BuiltPackage> {
        let snapshot = self.resolve(reference).await.or_raise(|| ErrorKind::Package(reference.to_string()))?;
        Ok(BuiltPackage { digest: snapshot.digest, artifacts: snapshot.files })
    }
}
