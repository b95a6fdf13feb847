use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use sfx_store::{Digest, Fingerprint, validate_path};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Whether a previous result may stand in for running a process again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheScope {
    /// Reuse any previous result, failures included, across sessions.
    Always,
    /// Reuse previous successes across sessions. Failures always re-run.
    #[default]
    Successful,
    /// Reuse any result, but only within the current runner.
    PerSession,
    /// Always run.
    Never,
}

/// A fully specified, immutable request to run one process.
///
/// Built with [`ProcessRequest::builder`]; every optional field is defaulted
/// at construction and nothing changes afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessRequest {
    argv: Vec<String>,
    input_digest: Digest,
    immutable_mounts: BTreeMap<PathBuf, Digest>,
    env: BTreeMap<String, String>,
    output_files: BTreeSet<PathBuf>,
    output_directories: BTreeSet<PathBuf>,
    cache_scope: CacheScope,
    timeout: Option<Duration>,
    description: String,
    level: Level,
}

/// The parts of a request that determine its result.
#[derive(Serialize)]
struct CacheKey<'a> {
    argv: &'a [String],
    input_digest: &'a Digest,
    immutable_mounts: &'a BTreeMap<PathBuf, Digest>,
    env: &'a BTreeMap<String, String>,
    output_files: &'a BTreeSet<PathBuf>,
    output_directories: &'a BTreeSet<PathBuf>,
    timeout_ms: Option<u128>,
}

impl ProcessRequest {
    pub fn builder<I, S>(argv: I, description: impl Into<String>) -> ProcessRequestBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProcessRequestBuilder {
            argv: argv.into_iter().map(Into::into).collect(),
            input_digest: Digest::empty(),
            immutable_mounts: BTreeMap::new(),
            env: BTreeMap::new(),
            output_files: Vec::new(),
            output_directories: Vec::new(),
            cache_scope: CacheScope::default(),
            timeout: None,
            description: description.into(),
            level: Level::INFO,
        }
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn input_digest(&self) -> Digest {
        self.input_digest
    }

    pub fn immutable_mounts(&self) -> &BTreeMap<PathBuf, Digest> {
        &self.immutable_mounts
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn output_files(&self) -> &BTreeSet<PathBuf> {
        &self.output_files
    }

    pub fn output_directories(&self) -> &BTreeSet<PathBuf> {
        &self.output_directories
    }

    pub fn cache_scope(&self) -> CacheScope {
        self.cache_scope
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// Cache key of the request.
    ///
    /// Description, log level and cache scope do not affect what the process
    /// produces, so they are left out.
    pub fn fingerprint(&self) -> Fingerprint {
        let key = CacheKey {
            argv: &self.argv,
            input_digest: &self.input_digest,
            immutable_mounts: &self.immutable_mounts,
            env: &self.env,
            output_files: &self.output_files,
            output_directories: &self.output_directories,
            timeout_ms: self.timeout.map(|t| t.as_millis()),
        };
        // JSON cannot hold non UTF-8 paths; fall back to the debug form.
        match serde_json::to_vec(&key) {
            Ok(bytes) => Fingerprint::of(&bytes),
            Err(_) => Fingerprint::of(format!("{self:?}").as_bytes()),
        }
    }
}

#[must_use]
pub struct ProcessRequestBuilder {
    argv: Vec<String>,
    input_digest: Digest,
    immutable_mounts: BTreeMap<PathBuf, Digest>,
    env: BTreeMap<String, String>,
    output_files: Vec<PathBuf>,
    output_directories: Vec<PathBuf>,
    cache_scope: CacheScope,
    timeout: Option<Duration>,
    description: String,
    level: Level,
}
impl ProcessRequestBuilder {
    pub fn input_digest(mut self, digest: Digest) -> Self {
        self.input_digest = digest;
        self
    }

    /// Mounts `digest` read-only at `path` inside the sandbox.
    pub fn mount(mut self, path: impl Into<PathBuf>, digest: Digest) -> Self {
        self.immutable_mounts.insert(path.into(), digest);
        self
    }

    pub fn mounts(mut self, mounts: impl IntoIterator<Item = (PathBuf, Digest)>) -> Self {
        self.immutable_mounts.extend(mounts);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_files.push(path.into());
        self
    }

    pub fn output_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_directories.push(path.into());
        self
    }

    pub fn cache_scope(mut self, scope: CacheScope) -> Self {
        self.cache_scope = scope;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Validates and freezes the request.
    pub fn build(self) -> Result<ProcessRequest> {
        if self.argv.is_empty() || self.argv[0].is_empty() {
            exn::bail!(ErrorKind::EmptyArgv);
        }
        let output_files = self.output_files.iter().map(|p| checked(p, "output file")).collect::<Result<_>>()?;
        let output_directories =
            self.output_directories.iter().map(|p| checked(p, "output directory")).collect::<Result<_>>()?;
        let mut immutable_mounts: BTreeMap<PathBuf, Digest> = BTreeMap::new();
        for (path, digest) in &self.immutable_mounts {
            let path = checked(path, "mount point")?;
            if let Some(existing) = immutable_mounts.keys().find(|m| m.starts_with(&path) || path.starts_with(m)) {
                exn::bail!(ErrorKind::InvalidRequest(format!(
                    "mount points {} and {} overlap",
                    existing.display(),
                    path.display()
                )));
            }
            immutable_mounts.insert(path, *digest);
        }
        let request = ProcessRequest {
            argv: self.argv,
            input_digest: self.input_digest,
            immutable_mounts,
            env: self.env,
            output_files,
            output_directories,
            cache_scope: self.cache_scope,
            timeout: self.timeout,
            description: self.description,
            level: self.level,
        };
        for output in request.output_files.iter().chain(&request.output_directories) {
            if request.immutable_mounts.keys().any(|m| output.starts_with(m)) {
                exn::bail!(ErrorKind::InvalidRequest(format!("output {} lies inside a read-only mount", output.display())));
            }
        }
        Ok(request)
    }
}

fn checked(path: &Path, what: &str) -> Result<PathBuf> {
    match validate_path(path) {
        Ok(path) => Ok(path),
        Err(_) => exn::bail!(ErrorKind::InvalidRequest(format!("invalid {what}: {}", path.display()))),
    }
}
