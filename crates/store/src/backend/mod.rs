//! Blob backend trait and implementations.
//!
//! A blob backend is a content-addressed key/value store: the key of a blob
//! is always the [`Fingerprint`] of its bytes. Both file contents and tree
//! manifests live here, which is what lets a [`Digest`](crate::Digest) stay
//! meaningful across processes when a persistent backend is used.

mod local;
mod memory;

pub use self::local::LocalBackend;
pub use self::memory::MemoryBackend;
use crate::Fingerprint;
use crate::error::Result;
use async_trait::async_trait;

/// Unified interface for blob storage.
///
/// Writes are insert-if-absent: writing bytes that are already present is a
/// no-op, and concurrent writers of identical content never conflict.
///
/// # Examples
///
/// ```
/// use sfx_store::backend::{BlobBackend, MemoryBackend};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MemoryBackend::default();
/// let key = backend.write(b"echo test").await?;
/// assert!(backend.exists(&key).await?);
/// assert_eq!(backend.read(&key).await?, b"echo test");
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Name of the backend (used for logging only).
    fn name(&self) -> &str;

    /// Check if a blob exists.
    async fn exists(&self, key: &Fingerprint) -> Result<bool>;

    /// Read a blob.
    ///
    /// Returns [`UnknownDigest`](crate::error::ErrorKind::UnknownDigest) if
    /// the blob does not exist.
    async fn read(&self, key: &Fingerprint) -> Result<Vec<u8>>;

    /// Store a blob, returning its key.
    async fn write(&self, data: &[u8]) -> Result<Fingerprint>;
}
