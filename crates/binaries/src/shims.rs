use crate::error::{ErrorKind, Result};
use crate::resolver::BinaryPath;
use exn::ResultExt;
use sfx_store::{Digest, FileContent, Store};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Directory, relative to the sandbox root, under which shims are mounted.
pub const SHIMS_DIR: &str = "__shims";

/// Placeholder for the sandbox root in environment values. The process runner
/// replaces it right before spawning.
pub const CHROOT: &str = "{chroot}";

/// A hermetic `PATH`: one read-only mount per declared binary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShimSet {
    binaries: Vec<BinaryPath>,
    mounts: BTreeMap<PathBuf, Digest>,
    digest: Digest,
    path: String,
}
impl ShimSet {
    /// Mount point → shim digest, ready to use as immutable mounts.
    pub fn mounts(&self) -> &BTreeMap<PathBuf, Digest> {
        &self.mounts
    }

    /// Every shim merged into a single tree, rooted at the sandbox root.
    pub fn digest(&self) -> Digest {
        self.digest
    }

    /// `PATH` value listing exactly the shim directories, with [`CHROOT`]
    /// placeholders.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn binaries(&self) -> &[BinaryPath] {
        &self.binaries
    }
}

fn quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

fn shim_script(binary: &BinaryPath) -> String {
    format!(
        "#!/bin/sh\n# {name} blake3:{fingerprint}\nexec {path} \"$@\"\n",
        name = binary.name,
        fingerprint = binary.fingerprint,
        path = quote(&binary.path),
    )
}

/// Builds the shims for `binaries`.
///
/// Duplicate requests for the same executable collapse into one shim; two
/// different executables under the same name are a
/// [`ShimConflict`](ErrorKind::ShimConflict).
#[tracing::instrument(skip(store, binaries), fields(count = binaries.len()))]
pub async fn build_shims(store: &Store, binaries: &[BinaryPath], rationale: &str) -> Result<ShimSet> {
    let mut unique: BTreeMap<&str, &BinaryPath> = BTreeMap::new();
    for binary in binaries {
        match unique.get(binary.name.as_str()) {
            Some(existing) if existing.fingerprint == binary.fingerprint => {},
            Some(existing) => exn::bail!(ErrorKind::ShimConflict {
                name: binary.name.clone(),
                first: existing.path.clone(),
                second: binary.path.clone(),
            }),
            None => {
                unique.insert(&binary.name, binary);
            },
        }
    }

    let mut mounts = BTreeMap::new();
    let mut entries = Vec::with_capacity(unique.len());
    for (name, binary) in &unique {
        let shim = FileContent::new(*name, shim_script(binary)).executable(true);
        let digest = store.create_digest([shim]).await.or_raise(|| ErrorKind::Store)?;
        let mount = Path::new(SHIMS_DIR).join(name);
        entries.push(format!("{CHROOT}/{}", mount.display()));
        mounts.insert(mount, digest);
    }

    let mut prefixed = Vec::with_capacity(mounts.len());
    for (mount, digest) in &mounts {
        prefixed.push(store.add_prefix(*digest, mount).await.or_raise(|| ErrorKind::Store)?);
    }
    let digest = store.merge(prefixed).await.or_raise(|| ErrorKind::Store)?;
    tracing::debug!(rationale, digest = %digest, "Built binary shims");

    Ok(ShimSet { binaries: unique.into_values().cloned().collect(), mounts, digest, path: entries.join(":") })
}
