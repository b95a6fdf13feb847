//! Value types of the content store.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::str::FromStr;

/// BLAKE3 hash of some bytes: a blob, a tree manifest, or an executable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; blake3::OUT_LEN]);
impl Fingerprint {
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        blake3::Hash::from_bytes(self.0).to_hex().to_string()
    }

    pub fn as_bytes(&self) -> &[u8; blake3::OUT_LEN] {
        &self.0
    }
}
impl From<blake3::Hash> for Fingerprint {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}
impl FromStr for Fingerprint {
    type Err = blake3::HexError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        blake3::Hash::from_hex(s.trim()).map(Self::from)
    }
}
impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.to_hex())
    }
}
impl Debug for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}
impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}
impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        hex.parse().map_err(D::Error::custom)
    }
}

/// Identity of an immutable file tree.
///
/// The fingerprint and size are those of the tree's canonical manifest, so
/// two digests are equal exactly when their trees hold the same paths with
/// the same contents and permissions. Digests are plain values; resolving one
/// back into files requires the [`Store`](crate::Store) that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest {
    pub fingerprint: Fingerprint,
    pub size: u64,
}
impl Digest {
    pub fn new(fingerprint: Fingerprint, size: u64) -> Self {
        Self { fingerprint, size }
    }

    /// Digest of the tree with no files in it.
    pub fn empty() -> Self {
        *crate::tree::EMPTY_DIGEST
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::empty()
    }
}
impl Default for Digest {
    fn default() -> Self {
        Self::empty()
    }
}
impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}", self.fingerprint, self.size)
    }
}

/// A digest plus the files it contains, in path order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub digest: Digest,
    pub files: Vec<PathBuf>,
}
impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// A single file with its bytes, used to create and inspect trees.
#[derive(Clone, PartialEq, Eq)]
pub struct FileContent {
    pub path: PathBuf,
    pub content: Vec<u8>,
    pub is_executable: bool,
}
impl FileContent {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> Self {
        Self { path: path.into(), content: content.into(), is_executable: false }
    }

    pub fn executable(mut self, is_executable: bool) -> Self {
        self.is_executable = is_executable;
        self
    }
}
impl Debug for FileContent {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FileContent")
            .field("path", &self.path)
            .field("len", &self.content.len())
            .field("is_executable", &self.is_executable)
            .finish()
    }
}
