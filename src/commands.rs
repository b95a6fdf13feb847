use crate::error::{ErrorKind, Result};
use exn::{Frame, OptionExt, ResultExt};
use sfx_binaries::BinaryResolver;
use sfx_bootstrap::{Platform, UrlDownloader};
use sfx_config::Config;
use sfx_makeself::{Makeself, Project, RunArchive, WorkspaceSources};
use sfx_process::ProcessRunner;
use sfx_process::error::ErrorKind as ProcessErrorKind;
use sfx_store::Store;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Captured into the sandbox under this name when running an archive.
const EXTRACT_DIR: &str = "__extracted";

pub struct Context {
    config: Config,
    makeself: Arc<Makeself>,
    resolver: Arc<BinaryResolver>,
}
impl Context {
    pub fn new(config: Config) -> Result<Self> {
        let store = match config.store.resolved_root() {
            Some(root) => Store::local(&root).or_raise(|| ErrorKind::Store)?,
            None => Store::memory(),
        };
        let mut runner = ProcessRunner::new(store).keep_sandboxes(config.process.keep_sandboxes);
        if let Some(dir) = &config.process.sandbox_root {
            runner = runner.with_sandbox_root(dir);
        }
        let resolver = Arc::new(BinaryResolver::new(config.binaries.search_paths.clone()));
        let tool = config.makeself.tool().or_raise(|| ErrorKind::Config)?;
        let platform = Platform::current().or_raise(|| ErrorKind::Config)?;
        let makeself =
            Arc::new(Makeself::new(Arc::new(runner), Arc::clone(&resolver), Arc::new(UrlDownloader), tool, platform));
        Ok(Self { config, makeself, resolver })
    }

    fn store(&self) -> &Store {
        self.makeself.store()
    }

    /// Builds the named archives (all of them when none are named) into `dist`.
    pub async fn package(&self, names: &[String], workspace: &Path, dist: &Path) -> Result<()> {
        let requests = self.config.archive_requests().or_raise(|| ErrorKind::Config)?;
        let sources = WorkspaceSources::new(self.store().clone(), workspace);
        let project = Project::new(Arc::clone(&self.makeself), sources, requests).or_raise(|| ErrorKind::Config)?;
        let built = project.build_all(names).await.or_raise(|| ErrorKind::Build(names.join(", ")))?;
        tracing::debug!(archives = built.len(), dist = %dist.display(), "Writing archives");
        for archive in built {
            self.store()
                .materialize(archive.digest, dist, false)
                .await
                .or_raise(|| ErrorKind::Output(dist.display().to_string()))?;
            for artifact in &archive.artifacts {
                println!("{}", dist.join(&artifact.relpath).display());
            }
        }
        Ok(())
    }

    /// Runs an archive from disk, optionally keeping what it extracts in
    /// `target`. A non-zero exit of the archive becomes the returned code.
    pub async fn run(&self, archive: &Path, target: Option<&Path>, args: &[String], check: bool) -> Result<ExitCode> {
        let describe = || ErrorKind::Run(archive.display().to_string());
        let (dir, name) = split_archive_path(archive).ok_or_raise(describe)?;
        let digest = self.store().capture(&dir, &[PathBuf::from(&name)], &[]).await.or_raise(describe)?;
        let mut run = RunArchive::new(name, digest).args(args.iter().cloned()).check(check);
        if target.is_some() {
            run = run.output_directory(EXTRACT_DIR);
        }
        let result = match self.makeself.run_archive(&run).await {
            Ok(result) => result,
            Err(err) => {
                let Some((exit_code, stdout, stderr)) = execution_failure(err.frame()) else {
                    return Err(err.raise(describe()));
                };
                std::io::stdout().write_all(stdout).or_raise(describe)?;
                std::io::stderr().write_all(stderr).or_raise(describe)?;
                tracing::error!(archive = %archive.display(), exit_code, "Archive failed");
                return Ok(ExitCode::from(exit_status(exit_code)));
            },
        };
        std::io::stdout().write_all(&result.stdout).or_raise(describe)?;
        std::io::stderr().write_all(&result.stderr).or_raise(describe)?;
        if let Some(target) = target {
            let extracted = self.store().remove_prefix(result.output_digest, EXTRACT_DIR).await.or_raise(describe)?;
            self.store()
                .materialize(extracted, target, false)
                .await
                .or_raise(|| ErrorKind::Output(target.display().to_string()))?;
        }
        Ok(ExitCode::SUCCESS)
    }

    /// Prints where each utility resolves to.
    pub async fn which(&self, names: &[String]) -> Result<()> {
        for name in names {
            let binary = self.resolver.resolve(name).await.or_raise(|| ErrorKind::Binaries(name.clone()))?;
            println!("{}\t{}\tblake3:{}", binary.name, binary.path.display(), binary.fingerprint);
        }
        Ok(())
    }
}

/// Splits an archive path into the directory to capture from and the file
/// name inside it.
fn split_archive_path(path: &Path) -> Option<(PathBuf, String)> {
    let name = path.file_name()?.to_str()?.to_string();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Some((dir, name))
}

/// Finds the process failure behind `frame`: its exit code and output.
fn execution_failure(frame: &Frame) -> Option<(i32, &[u8], &[u8])> {
    if let Some(ProcessErrorKind::ProcessExecutionFailure { exit_code, stdout, stderr, .. }) =
        frame.error().downcast_ref::<ProcessErrorKind>()
    {
        return Some((*exit_code, stdout.as_slice(), stderr.as_slice()));
    }
    frame.children().iter().find_map(execution_failure)
}

/// Maps a process exit code onto what a shell would report: signals become
/// `128 + signal`, anything else out of range saturates.
fn exit_status(code: i32) -> u8 {
    let code = if code < 0 { 128i32.saturating_sub(code) } else { code };
    u8::try_from(code.clamp(0, u8::MAX.into())).unwrap_or(u8::MAX)
}
