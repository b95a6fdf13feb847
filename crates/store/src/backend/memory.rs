//! In-memory blob backend.

use crate::Fingerprint;
use crate::backend::BlobBackend;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory blob backend.
///
/// Blobs are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// operate on `&self`. Contents live for as long as the backend does, which
/// makes this the backend for a single build session and for tests.
pub struct MemoryBackend {
    name: String,
    blobs: RwLock<HashMap<Fingerprint, Arc<[u8]>>>,
}
impl MemoryBackend {
    /// Change the name of the backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of distinct blobs held.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }
}
impl Default for MemoryBackend {
    fn default() -> Self {
        Self { name: "memory".to_string(), blobs: RwLock::new(HashMap::new()) }
    }
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, key: &Fingerprint) -> Result<bool> {
        Ok(self.blobs.read().await.contains_key(key))
    }

    async fn read(&self, key: &Fingerprint) -> Result<Vec<u8>> {
        match self.blobs.read().await.get(key) {
            Some(data) => Ok(data.to_vec()),
            None => exn::bail!(ErrorKind::UnknownDigest(*key)),
        }
    }

    async fn write(&self, data: &[u8]) -> Result<Fingerprint> {
        let key = Fingerprint::of(data);
        self.blobs.write().await.entry(key).or_insert_with(|| Arc::from(data));
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_read() {
        let backend = MemoryBackend::default();
        let key = backend.write(b"Hello, world!").await.unwrap();
        assert_eq!(key, Fingerprint::of(b"Hello, world!"));
        assert_eq!(backend.read(&key).await.unwrap(), b"Hello, world!");
    }

    #[tokio::test]
    async fn test_duplicate_writes_are_deduplicated() {
        let backend = MemoryBackend::default();
        backend.write(b"same").await.unwrap();
        backend.write(b"same").await.unwrap();
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn test_read_unknown() {
        let backend = MemoryBackend::default();
        let err = backend.read(&Fingerprint::of(b"missing")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnknownDigest(_)));
        assert!(!backend.exists(&Fingerprint::of(b"missing")).await.unwrap());
    }
}
