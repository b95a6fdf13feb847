use crate::create::MakeselfProcess;
use crate::error::{ErrorKind, Result};
use crate::makeself::Makeself;
use crate::output::OutputPath;
use async_trait::async_trait;
use exn::ResultExt;
use futures::future::try_join_all;
use sfx_process::CacheScope;
use sfx_store::error::ErrorKind as StoreErrorKind;
use sfx_store::{Digest, Snapshot};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory the archive contents are staged under inside the sandbox.
pub const ARCHIVE_DIR: &str = "__archive";

/// Turns a source reference into the files it names.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(&self, reference: &str) -> Result<Snapshot>;
}

/// Output of building one package reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuiltPackage {
    pub digest: Digest,
    /// Relative paths of what was built, inside `digest`.
    pub artifacts: Vec<PathBuf>,
}

/// Builds package references into digests.
#[async_trait]
pub trait PackageBuilder: Send + Sync {
    async fn build(&self, reference: &str) -> Result<BuiltPackage>;
}

/// Everything needed to assemble one archive. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveRequest {
    name: String,
    startup_script: String,
    packages: Vec<String>,
    files: Vec<String>,
    output_path: PathBuf,
    label: String,
    extra_args: Vec<String>,
    cache_scope: CacheScope,
    timeout: Option<Duration>,
}

impl ArchiveRequest {
    pub fn builder(name: impl Into<String>, startup_script: impl Into<String>) -> ArchiveRequestBuilder {
        ArchiveRequestBuilder {
            name: name.into(),
            dir: String::new(),
            startup_script: startup_script.into(),
            packages: Vec::new(),
            files: Vec::new(),
            output_path: None,
            label: None,
            extra_args: Vec::new(),
            cache_scope: CacheScope::default(),
            timeout: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn startup_script(&self) -> &str {
        &self.startup_script
    }

    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Rendered from the output path template.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn extra_args(&self) -> &[String] {
        &self.extra_args
    }

    pub fn cache_scope(&self) -> CacheScope {
        self.cache_scope
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[must_use]
pub struct ArchiveRequestBuilder {
    name: String,
    dir: String,
    startup_script: String,
    packages: Vec<String>,
    files: Vec<String>,
    output_path: Option<String>,
    label: Option<String>,
    extra_args: Vec<String>,
    cache_scope: CacheScope,
    timeout: Option<Duration>,
}
impl ArchiveRequestBuilder {
    /// Directory the archive is defined in, used by the default output path.
    pub fn dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn packages(mut self, packages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.packages.extend(packages.into_iter().map(Into::into));
        self
    }

    pub fn files(mut self, files: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.files.extend(files.into_iter().map(Into::into));
        self
    }

    /// An output path template; see [`OutputPath`].
    pub fn output_path(mut self, template: Option<String>) -> Self {
        self.output_path = template;
        self
    }

    pub fn label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    /// Passed through to `makeself.sh`, e.g. `--packaging-date`.
    pub fn extra_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(Into::into));
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

    pub fn build(self) -> Result<ArchiveRequest> {
        if self.name.trim().is_empty() || self.name.contains('/') {
            exn::bail!(ErrorKind::InvalidRequest(format!("invalid archive name {:?}", self.name)));
        }
        if self.startup_script.trim().is_empty() {
            exn::bail!(ErrorKind::InvalidRequest(format!("archive {} has no startup script", self.name)));
        }
        let output_path = OutputPath::new(self.output_path.as_deref())?.generate(&self.name, &self.dir)?;
        Ok(ArchiveRequest {
            label: self.label.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            startup_script: self.startup_script,
            packages: self.packages,
            files: self.files,
            output_path,
            extra_args: self.extra_args,
            cache_scope: self.cache_scope,
            timeout: self.timeout,
        })
    }
}

/// One file produced by packaging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuiltArchiveArtifact {
    pub relpath: PathBuf,
    pub digest: Digest,
    pub extra_log_lines: Vec<String>,
}
impl BuiltArchiveArtifact {
    fn new(relpath: PathBuf, digest: Digest) -> Self {
        let extra_log_lines = vec![format!("Built makeself archive: {}", relpath.display())];
        Self { relpath, digest, extra_log_lines }
    }
}

/// A packaged archive: the output digest and what it contains.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuiltArchive {
    pub digest: Digest,
    pub artifacts: Vec<BuiltArchiveArtifact>,
}

impl Makeself {
    /// Assembles `req` into a self-extracting archive.
    ///
    /// Inputs are resolved concurrently and merged before makeself is
    /// bootstrapped, so a conflicting request never downloads anything.
    #[tracing::instrument(skip_all, fields(archive = req.name()))]
    pub async fn package(
        &self,
        req: &ArchiveRequest,
        sources: &dyn SourceResolver,
        packages: &dyn PackageBuilder,
    ) -> Result<BuiltArchive> {
        let store = self.store();
        let file_futures: Vec<_> = req.files().iter().map(|file| sources.resolve(file)).collect();
        let package_futures: Vec<_> = req.packages().iter().map(|package| packages.build(package)).collect();
        let (script, files, built) = tokio::try_join!(
            sources.resolve(req.startup_script()),
            try_join_all(file_futures),
            try_join_all(package_futures),
        )?;

        let [script_path] = script.files.as_slice() else {
            exn::bail!(ErrorKind::InvalidStartupScript {
                reference: req.startup_script().to_string(),
                count: script.files.len(),
            });
        };
        let inputs: Vec<Digest> = std::iter::once(script.digest)
            .chain(files.iter().map(|snapshot| snapshot.digest))
            .chain(built.iter().map(|package| package.digest))
            .collect();
        let merged = match store.merge(inputs).await {
            Ok(digest) => digest,
            Err(e) => {
                let kind = match &*e {
                    StoreErrorKind::PathConflict(path) => ErrorKind::ArchiveAssemblyConflict(path.clone()),
                    _ => ErrorKind::Store,
                };
                return Err(e.raise(kind));
            },
        };
        // The startup script may also arrive through `files`, so it is made
        // executable only after merging.
        let merged = store.mark_executable(merged, script_path).await.or_raise(|| ErrorKind::Store)?;
        let staged = store.add_prefix(merged, ARCHIVE_DIR).await.or_raise(|| ErrorKind::Store)?;

        let output_path = req.output_path();
        let Some(file_name) = output_path.file_name().and_then(|name| name.to_str()) else {
            exn::bail!(ErrorKind::InvalidRequest(format!("invalid output path {}", output_path.display())));
        };
        let process = MakeselfProcess::archive(ARCHIVE_DIR, file_name, req.label(), script_path)
            .options(req.extra_args().iter().cloned())
            .input_digest(staged)
            .cache_scope(req.cache_scope())
            .timeout(req.timeout());
        let result = self.create_archive(&process).await?;

        let digest = match output_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            Some(parent) => store.add_prefix(result.output_digest, parent).await.or_raise(|| ErrorKind::Store)?,
            None => result.output_digest,
        };
        let snapshot = store.snapshot(digest).await.or_raise(|| ErrorKind::Store)?;
        if snapshot.files.len() != 1 {
            exn::bail!(ErrorKind::UnexpectedOutput(snapshot.files.len()));
        }
        let artifacts: Vec<_> =
            snapshot.files.into_iter().map(|relpath| BuiltArchiveArtifact::new(relpath, digest)).collect();
        for artifact in &artifacts {
            for line in &artifact.extra_log_lines {
                tracing::info!("{line}");
            }
        }
        Ok(BuiltArchive { digest, artifacts })
    }
}
