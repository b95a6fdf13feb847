use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use sfx_store::Fingerprint;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Directories searched for system utilities when none are configured.
pub const SEARCH_PATHS: &[&str] = &["/usr/bin", "/bin", "/usr/local/bin", "/opt/homebrew/bin"];

/// A system utility pinned to one file on disk.
///
/// The fingerprint is the hash of the executable itself, so anything keyed on
/// a `BinaryPath` changes when the binary is upgraded, even if its path does
/// not.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BinaryPath {
    pub name: String,
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
}

/// `None` until looked up; then the hit or the miss.
type Slot = Arc<Mutex<Option<Option<BinaryPath>>>>;

/// Finds system utilities on a fixed, ordered search path.
///
/// Lookups are memoised for the lifetime of the resolver, misses included: a
/// binary that was absent once stays absent. Create one resolver per build.
pub struct BinaryResolver {
    search_path: Vec<PathBuf>,
    resolved: Mutex<HashMap<String, Slot>>,
}
impl Default for BinaryResolver {
    fn default() -> Self {
        Self::new(SEARCH_PATHS.iter().map(PathBuf::from))
    }
}
impl BinaryResolver {
    pub fn new(search_path: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self { search_path: search_path.into_iter().map(Into::into).collect(), resolved: Mutex::new(HashMap::new()) }
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// Returns the first executable called `name` on the search path.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, name: &str) -> Result<BinaryPath> {
        if name.is_empty() || name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') {
            exn::bail!(ErrorKind::InvalidName(name.to_string()));
        }
        let slot = Arc::clone(self.resolved.lock().await.entry(name.to_string()).or_default());
        let mut found = slot.lock().await;
        if found.is_none() {
            let (owned_name, search_path) = (name.to_string(), self.search_path.clone());
            let hit = tokio::task::spawn_blocking(move || lookup(&owned_name, &search_path))
                .await
                .or_raise(|| ErrorKind::Io(std::io::Error::other("binary lookup task panicked")))??;
            *found = Some(hit);
        }
        match found.as_ref().and_then(Option::as_ref) {
            Some(binary) => Ok(binary.clone()),
            None => exn::bail!(ErrorKind::BinaryNotFound { name: name.to_string(), search_path: self.search_path.clone() }),
        }
    }

    /// Resolves several binaries concurrently, failing on the first miss.
    pub async fn resolve_all<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<BinaryPath>> {
        futures::future::try_join_all(names.iter().map(|name| self.resolve(name.as_ref()))).await
    }
}

fn lookup(name: &str, search_path: &[PathBuf]) -> Result<Option<BinaryPath>> {
    let Ok(joined) = std::env::join_paths(search_path) else {
        // A search path entry containing the separator can never match anything.
        return Ok(None);
    };
    let path = match which::which_in(name, Some(joined), Path::new("/")) {
        Ok(path) => path,
        Err(which::Error::CannotFindBinaryPath) => {
            tracing::debug!(name, "Binary not found on search path");
            return Ok(None);
        },
        Err(e) => exn::bail!(ErrorKind::Io(std::io::Error::other(e.to_string()))),
    };
    let content = std::fs::read(&path).map_err(ErrorKind::Io)?;
    let fingerprint = Fingerprint::of(&content);
    tracing::debug!(name, path = %path.display(), %fingerprint, "Resolved binary");
    Ok(Some(BinaryPath { name: name.to_string(), path, fingerprint }))
}
