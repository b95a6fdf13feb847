//! Local filesystem blob backend.
//!
//! Blobs are stored in a sharded directory layout keyed by their BLAKE3 hash:
//!
//! ```text
//! <root>/
//!   <first 2 hex chars>/
//!     <remaining hex chars>
//! ```

use crate::Fingerprint;
use crate::backend::BlobBackend;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::create_dir_all as sync_create_dir;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Local filesystem blob backend.
///
/// Survives across processes, so digests (and the process results that refer
/// to them) can be reused by later builds.
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local blob backend rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, or exists but is not a
    /// directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Use non-async here; it'll only happen once per store and it's
            // not worth the hassle of making the constructor async.
            sync_create_dir(&root).map_err(ErrorKind::Io)?;
        }
        Ok(Self { name: name.into(), root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &Fingerprint) -> PathBuf {
        let hex = key.to_hex();
        let (shard, rest) = hex.split_at(2);
        self.root.join(shard).join(rest)
    }
}

#[async_trait]
impl BlobBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, key: &Fingerprint) -> Result<bool> {
        Ok(fs::try_exists(self.blob_path(key)).await.map_err(ErrorKind::Io)?)
    }

    async fn read(&self, key: &Fingerprint) -> Result<Vec<u8>> {
        let data = match fs::read(self.blob_path(key)).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => exn::bail!(ErrorKind::UnknownDigest(*key)),
            Err(e) => exn::bail!(ErrorKind::Io(e)),
        };
        if Fingerprint::of(&data) != *key {
            tracing::warn!(backend = %self.name, blob = %key, "Stored blob does not match its key");
            exn::bail!(ErrorKind::Corrupt(*key));
        }
        Ok(data)
    }

    async fn write(&self, data: &[u8]) -> Result<Fingerprint> {
        let key = Fingerprint::of(data);
        let target = self.blob_path(&key);
        if fs::try_exists(&target).await.map_err(ErrorKind::Io)? {
            return Ok(key);
        }
        let shard = target.parent().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&shard).await.map_err(ErrorKind::Io)?;
        let data = data.to_vec();
        // Write to a sibling temporary file, then rename into place so readers
        // never observe a partially written blob.
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&shard).map_err(ErrorKind::Io)?;
            tmp.write_all(&data).map_err(ErrorKind::Io)?;
            tmp.persist(&target).map_err(|e| ErrorKind::Io(e.error))?;
            Ok(())
        })
        .await
        .or_raise(|| ErrorKind::Io(std::io::Error::other("blob writer task panicked")))??;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(LocalBackend::new("local", temp_dir.path()).is_ok());
        assert!(LocalBackend::new("local", "relative/path").is_err());
    }

    #[test]
    fn test_blob_path_is_sharded() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("local", temp_dir.path()).unwrap();
        let key = Fingerprint::of(b"data");
        let hex = key.to_hex();
        assert_eq!(backend.blob_path(&key), temp_dir.path().join(&hex[..2]).join(&hex[2..]));
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("local", temp_dir.path()).unwrap();
        let key = backend.write(b"Hello, world!").await.unwrap();
        assert!(backend.exists(&key).await.unwrap());
        assert_eq!(backend.read(&key).await.unwrap(), b"Hello, world!");
        // Writing again is a no-op.
        assert_eq!(backend.write(b"Hello, world!").await.unwrap(), key);
    }

    #[tokio::test]
    async fn test_persists_across_instances() {
        let temp_dir = tempfile::tempdir().unwrap();
        let key = LocalBackend::new("one", temp_dir.path()).unwrap().write(b"kept").await.unwrap();
        let other = LocalBackend::new("two", temp_dir.path()).unwrap();
        assert_eq!(other.read(&key).await.unwrap(), b"kept");
    }

    #[tokio::test]
    async fn test_read_unknown() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("local", temp_dir.path()).unwrap();
        let err = backend.read(&Fingerprint::of(b"missing")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnknownDigest(_)));
    }

    #[tokio::test]
    async fn test_detects_corruption() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("local", temp_dir.path()).unwrap();
        let key = backend.write(b"original").await.unwrap();
        std::fs::write(backend.blob_path(&key), b"tampered").unwrap();
        let err = backend.read(&key).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Corrupt(_)));
    }
}
