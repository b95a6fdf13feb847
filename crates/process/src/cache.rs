//! Process result caching.
//!
//! Results are keyed by [`ProcessRequest::fingerprint`](crate::ProcessRequest::fingerprint).
//! The session cache lives in memory for the lifetime of a runner; the action
//! cache persists next to a local store as one JSON file per request:
//!
//! ```text
//! <store root>/actions/<request fingerprint>.json
//! ```
//!
//! Entries only point at blobs, so an entry is only usable while the store
//! still holds every blob it names.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use sfx_store::{BlobBackend, Digest, Fingerprint, Store};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::RwLock;

/// What a finished process left behind, before it is judged a success.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Outcome {
    pub exit_code: i32,
    pub output_digest: Digest,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct ActionEntry {
    exit_code: i32,
    output_digest: Digest,
    stdout: Fingerprint,
    stderr: Fingerprint,
    /// Unix timestamp of when the entry was written.
    created: i64,
}

#[derive(Default)]
pub(crate) struct SessionCache {
    entries: RwLock<HashMap<Fingerprint, Outcome>>,
}
impl SessionCache {
    pub async fn get(&self, key: &Fingerprint) -> Option<Outcome> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn insert(&self, key: Fingerprint, outcome: Outcome) {
        self.entries.write().await.insert(key, outcome);
    }
}

pub(crate) struct ActionCache {
    dir: PathBuf,
}
impl ActionCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn entry_path(&self, key: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{}.json", key.to_hex()))
    }

    /// Loads an entry, treating unreadable entries and missing blobs as misses.
    pub async fn get(&self, store: &Store, key: &Fingerprint) -> Result<Option<Outcome>> {
        let bytes = match fs::read(self.entry_path(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => exn::bail!(ErrorKind::Io(e)),
        };
        let entry: ActionEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Ignoring unreadable action cache entry");
                return Ok(None);
            },
        };
        if !store.contains(&entry.output_digest).await.or_raise(|| ErrorKind::Cache)? {
            tracing::debug!(key = %key, "Action cache entry refers to missing outputs");
            return Ok(None);
        }
        let blobs = store.backend();
        let (stdout, stderr) = match (blobs.read(&entry.stdout).await, blobs.read(&entry.stderr).await) {
            (Ok(stdout), Ok(stderr)) => (stdout, stderr),
            _ => {
                tracing::debug!(key = %key, "Action cache entry refers to missing stdio");
                return Ok(None);
            },
        };
        Ok(Some(Outcome { exit_code: entry.exit_code, output_digest: entry.output_digest, stdout, stderr }))
    }

    pub async fn insert(&self, store: &Store, key: &Fingerprint, outcome: &Outcome) -> Result<()> {
        let blobs = store.backend();
        let entry = ActionEntry {
            exit_code: outcome.exit_code,
            output_digest: outcome.output_digest,
            stdout: blobs.write(&outcome.stdout).await.or_raise(|| ErrorKind::Cache)?,
            stderr: blobs.write(&outcome.stderr).await.or_raise(|| ErrorKind::Cache)?,
            created: time::UtcDateTime::now().unix_timestamp(),
        };
        let bytes = serde_json::to_vec_pretty(&entry).or_raise(|| ErrorKind::Cache)?;
        fs::create_dir_all(&self.dir).await.map_err(ErrorKind::Io)?;
        // Write then rename, so a concurrent reader sees the old entry or the new one.
        let (dir, target) = (self.dir.clone(), self.entry_path(key));
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut staging = tempfile::NamedTempFile::new_in(&dir).map_err(ErrorKind::Io)?;
            staging.write_all(&bytes).map_err(ErrorKind::Io)?;
            staging.persist(&target).map_err(|e| ErrorKind::Io(e.error))?;
            Ok(())
        })
        .await
        .or_raise(|| ErrorKind::Io(std::io::Error::other("action cache writer task panicked")))??;
        Ok(())
    }
}
