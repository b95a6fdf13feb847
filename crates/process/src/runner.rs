use crate::cache::{ActionCache, Outcome, SessionCache};
use crate::error::{ErrorKind, Result};
use crate::request::{CacheScope, ProcessRequest};
use exn::ResultExt;
use sfx_store::error::ErrorKind as StoreErrorKind;
use sfx_store::{Digest, Store, Tree, validate_path};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::process::Command;
use tracing::Level;

/// Placeholder for the sandbox root in environment values.
const CHROOT: &str = "{chroot}";

/// The result of a process that exited successfully.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessResult {
    /// Exactly the declared outputs.
    pub output_digest: Digest,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
    /// Whether the result was reused instead of running the process.
    pub cached: bool,
}

/// Runs [`ProcessRequest`]s in throwaway sandboxes.
///
/// Each run gets a fresh directory holding the input digest and the
/// read-only mounts, an empty environment apart from `req.env`, and no
/// stdin. Only declared outputs are read back.
pub struct ProcessRunner {
    store: Store,
    sandbox_root: Option<PathBuf>,
    keep_sandboxes: bool,
    session: SessionCache,
    actions: Option<ActionCache>,
}
impl ProcessRunner {
    /// Persistent stores also get a persistent action cache.
    pub fn new(store: Store) -> Self {
        let actions = store.root().map(|root| ActionCache::new(root.join("actions")));
        Self { store, sandbox_root: None, keep_sandboxes: false, session: SessionCache::default(), actions }
    }

    /// Create sandboxes below `dir` instead of the system temporary directory.
    pub fn with_sandbox_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sandbox_root = Some(dir.into());
        self
    }

    /// Leave sandboxes on disk after the process finishes (debugging aid).
    pub fn keep_sandboxes(mut self, keep: bool) -> Self {
        self.keep_sandboxes = keep;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    #[tracing::instrument(skip_all, fields(description = req.description()))]
    pub async fn run(&self, req: &ProcessRequest) -> Result<ProcessResult> {
        let key = req.fingerprint();
        if let Some(outcome) = self.lookup(req, &key).await? {
            tracing::debug!(key = %key, exit_code = outcome.exit_code, "Reusing cached process result");
            return finish(req, outcome, true);
        }

        announce(req.level(), req.description());
        let outcome = self.execute(req).await?;

        let cacheable = match req.cache_scope() {
            CacheScope::Always | CacheScope::PerSession => true,
            CacheScope::Successful => outcome.exit_code == 0,
            CacheScope::Never => false,
        };
        if cacheable {
            self.session.insert(key, outcome.clone()).await;
            if req.cache_scope() != CacheScope::PerSession
                && let Some(actions) = &self.actions
                && let Err(e) = actions.insert(&self.store, &key, &outcome).await
            {
                // The result itself is fine; only reuse suffers.
                tracing::warn!(key = %key, error = %e, "Failed to write action cache entry");
            }
        }
        finish(req, outcome, false)
    }

    async fn lookup(&self, req: &ProcessRequest, key: &sfx_store::Fingerprint) -> Result<Option<Outcome>> {
        let usable = |outcome: &Outcome| match req.cache_scope() {
            CacheScope::Always | CacheScope::PerSession => true,
            CacheScope::Successful => outcome.exit_code == 0,
            CacheScope::Never => false,
        };
        if req.cache_scope() == CacheScope::Never {
            return Ok(None);
        }
        if let Some(outcome) = self.session.get(key).await.filter(usable) {
            return Ok(Some(outcome));
        }
        if req.cache_scope() == CacheScope::PerSession {
            return Ok(None);
        }
        let Some(actions) = &self.actions else {
            return Ok(None);
        };
        match actions.get(&self.store, key).await {
            Ok(found) => Ok(found.filter(usable)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to read action cache entry");
                Ok(None)
            },
        }
    }

    async fn execute(&self, req: &ProcessRequest) -> Result<Outcome> {
        let input = self.store.tree(&req.input_digest()).await.or_raise(|| ErrorKind::Store)?;
        let mut mounts = Vec::with_capacity(req.immutable_mounts().len());
        for (mount, digest) in req.immutable_mounts() {
            if let Some(clash) = input.paths().find(|p| p.starts_with(mount) || mount.starts_with(p)) {
                exn::bail!(ErrorKind::InvalidRequest(format!(
                    "input file {} collides with mount point {}",
                    clash.display(),
                    mount.display()
                )));
            }
            mounts.push((mount, self.store.tree(digest).await.or_raise(|| ErrorKind::Store)?));
        }
        let sandboxed = sandboxed_program(req, &input, &mounts)?;

        let mut builder = tempfile::Builder::new();
        builder.prefix("sfx-sandbox-");
        let sandbox = match &self.sandbox_root {
            Some(root) => {
                tokio::fs::create_dir_all(root).await.map_err(ErrorKind::Io)?;
                builder.tempdir_in(root)
            },
            None => builder.tempdir(),
        }
        .map_err(ErrorKind::Io)?;
        let root = sandbox.path().to_path_buf();
        tracing::trace!(sandbox = %root.display(), "Created sandbox");

        let outcome = self.execute_in(req, &root, sandboxed).await;
        if self.keep_sandboxes {
            let kept = sandbox.keep();
            tracing::info!(sandbox = %kept.display(), succeeded = outcome.is_ok(), "Keeping sandbox");
        }
        outcome
    }

    /// Populates the sandbox at `root`, runs the process and captures its
    /// declared outputs.
    async fn execute_in(&self, req: &ProcessRequest, root: &Path, sandboxed: Option<PathBuf>) -> Result<Outcome> {
        self.store.materialize(req.input_digest(), root, false).await.or_raise(|| ErrorKind::Store)?;
        for (mount, digest) in req.immutable_mounts() {
            self.store.materialize(*digest, &root.join(mount), true).await.or_raise(|| ErrorKind::Store)?;
        }
        for output in req.output_files().iter().chain(req.output_directories()) {
            if let Some(parent) = root.join(output).parent() {
                tokio::fs::create_dir_all(parent).await.map_err(ErrorKind::Io)?;
            }
        }

        let program = match sandboxed {
            Some(relative) => root.join(relative),
            None => PathBuf::from(&req.argv()[0]),
        };
        let mut outcome = self.spawn(req, root, program).await?;
        if outcome.exit_code == 0 {
            outcome.output_digest = self.capture(req, root).await?;
        }
        Ok(outcome)
    }

    async fn spawn(&self, req: &ProcessRequest, root: &Path, program: PathBuf) -> Result<Outcome> {
        let chroot = root.display().to_string();
        let mut command = Command::new(&program);
        command
            .args(&req.argv()[1..])
            .current_dir(root)
            .env_clear()
            .envs(req.env().iter().map(|(k, v)| (k, v.replace(CHROOT, &chroot))))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = command.spawn().or_raise(|| ErrorKind::Spawn(program.display().to_string()))?;

        let output = match req.timeout() {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(output) => output,
                // Dropping the future drops the child, which kills it.
                Err(_) => exn::bail!(ErrorKind::Timeout { description: req.description().to_string(), timeout }),
            },
            None => child.wait_with_output().await,
        }
        .map_err(ErrorKind::Io)?;

        Ok(Outcome {
            exit_code: exit_code(output.status),
            output_digest: Digest::empty(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn capture(&self, req: &ProcessRequest, root: &Path) -> Result<Digest> {
        let files: Vec<PathBuf> = req.output_files().iter().cloned().collect();
        let dirs: Vec<PathBuf> = req.output_directories().iter().cloned().collect();
        match self.store.capture(root, &files, &dirs).await {
            Ok(digest) => Ok(digest),
            Err(e) => {
                let kind = match &*e {
                    StoreErrorKind::NotFound(path) => ErrorKind::MissingDeclaredOutput(path.clone()),
                    _ => ErrorKind::Store,
                };
                Err(e.raise(kind))
            },
        }
    }
}

/// Turns a raw outcome into a result, failing on a non-zero exit.
fn finish(req: &ProcessRequest, outcome: Outcome, cached: bool) -> Result<ProcessResult> {
    if outcome.exit_code != 0 {
        exn::bail!(ErrorKind::ProcessExecutionFailure {
            description: req.description().to_string(),
            exit_code: outcome.exit_code,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
        });
    }
    Ok(ProcessResult {
        output_digest: outcome.output_digest,
        stdout: outcome.stdout,
        stderr: outcome.stderr,
        exit_code: outcome.exit_code,
        cached,
    })
}

/// Programs given as a relative path with a separator live in the sandbox and
/// must be declared; bare names are looked up on the request's `PATH`.
/// Returns the sandbox-relative path of sandboxed programs.
fn sandboxed_program(req: &ProcessRequest, input: &Tree, mounts: &[(&PathBuf, Arc<Tree>)]) -> Result<Option<PathBuf>> {
    let argv0 = Path::new(&req.argv()[0]);
    if argv0.is_absolute() || !req.argv()[0].contains('/') {
        return Ok(None);
    }
    let Ok(relative) = validate_path(argv0) else {
        exn::bail!(ErrorKind::MissingInput(argv0.to_path_buf()));
    };
    let declared = input.get(&relative).is_some()
        || mounts.iter().any(|(mount, tree)| relative.strip_prefix(mount).is_ok_and(|inner| tree.get(inner).is_some()));
    if !declared {
        exn::bail!(ErrorKind::MissingInput(relative));
    }
    Ok(Some(relative))
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => -signal,
        (None, None) => -1,
    }
}
#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn announce(level: Level, description: &str) {
    match level {
        Level::ERROR => tracing::error!("{description}"),
        Level::WARN => tracing::warn!("{description}"),
        Level::INFO => tracing::info!("{description}"),
        Level::DEBUG => tracing::debug!("{description}"),
        _ => tracing::trace!("{description}"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use rstest::rstest;
    use sfx_store::FileContent;
    use std::time::Duration;

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn captures_only_declared_outputs() {
        let runner = ProcessRunner::new(Store::memory());
        let req = ProcessRequest::builder(sh("echo kept > out.txt; echo dropped > other.txt; mkdir -p dir/sub; echo x > dir/sub/x"), "write files")
            .output_file("out.txt")
            .output_directory("dir")
            .build()
            .unwrap();
        let result = runner.run(&req).await.unwrap();
        let snapshot = runner.store().snapshot(result.output_digest).await.unwrap();
        assert_eq!(snapshot.files, vec![PathBuf::from("dir/sub/x"), PathBuf::from("out.txt")]);
        assert_eq!(result.exit_code, 0);
        assert!(!result.cached);
    }

    #[tokio::test]
    async fn missing_declared_output_fails_even_on_success() {
        let runner = ProcessRunner::new(Store::memory());
        let req = ProcessRequest::builder(sh("true"), "no output").output_file("archive.run").build().unwrap();
        let err = runner.run(&req).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MissingDeclaredOutput(p) if p == Path::new("archive.run")));
    }

    #[tokio::test]
    async fn non_zero_exit_fails_with_captured_output() {
        let runner = ProcessRunner::new(Store::memory());
        let req = ProcessRequest::builder(sh("echo partial > out.txt; echo oops; echo bad >&2; exit 3"), "fail")
            .output_file("out.txt")
            .build()
            .unwrap();
        let err = runner.run(&req).await.unwrap_err();
        match &*err {
            ErrorKind::ProcessExecutionFailure { exit_code, stdout, stderr, .. } => {
                assert_eq!(*exit_code, 3);
                assert_eq!(stdout, b"oops\n");
                assert_eq!(stderr, b"bad\n");
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn signals_become_negative_exit_codes() {
        let runner = ProcessRunner::new(Store::memory());
        let req = ProcessRequest::builder(sh("kill -9 $$"), "killed").build().unwrap();
        let err = runner.run(&req).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ProcessExecutionFailure { exit_code: -9, .. }));
    }

    #[tokio::test]
    async fn timeout_kills_the_process() {
        let runner = ProcessRunner::new(Store::memory());
        let req = ProcessRequest::builder(sh("sleep 5"), "sleepy")
            .timeout(Some(Duration::from_millis(200)))
            .build()
            .unwrap();
        let err = runner.run(&req).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Timeout { .. }));
    }

    #[tokio::test]
    async fn environment_is_not_inherited() {
        let runner = ProcessRunner::new(Store::memory());
        let req = ProcessRequest::builder(sh("echo \"[$HOME][$GIVEN][$ROOTED]\""), "env")
            .env("GIVEN", "yes")
            .env("ROOTED", "{chroot}/bin")
            .build()
            .unwrap();
        let result = runner.run(&req).await.unwrap();
        let stdout = String::from_utf8(result.stdout).unwrap();
        assert!(stdout.starts_with("[][yes][/"), "{stdout}");
        assert!(stdout.trim_end().ends_with("/bin]"), "{stdout}");
        assert!(!stdout.contains("{chroot}"));
    }

    #[tokio::test]
    async fn inputs_and_read_only_mounts_are_visible() {
        let store = Store::memory();
        let input = store.create_digest([FileContent::new("data/in.txt", "input")]).await.unwrap();
        let tool = store
            .create_digest([FileContent::new("tool.sh", "#!/bin/sh\ncat data/in.txt > out.txt\n").executable(true)])
            .await
            .unwrap();
        let runner = ProcessRunner::new(store.clone());
        let req = ProcessRequest::builder(["__tool/tool.sh"], "run mounted tool")
            .input_digest(input)
            .mount("__tool", tool)
            .output_file("out.txt")
            .build()
            .unwrap();
        let result = runner.run(&req).await.unwrap();
        let contents = store.extract_contents(result.output_digest).await.unwrap();
        assert_eq!(contents[0].content, b"input");
    }

    #[tokio::test]
    async fn undeclared_program_is_a_missing_input() {
        let runner = ProcessRunner::new(Store::memory());
        let req = ProcessRequest::builder(["__makeself/makeself.sh"], "missing tool").build().unwrap();
        let err = runner.run(&req).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MissingInput(p) if p == Path::new("__makeself/makeself.sh")));
    }

    #[rstest]
    #[case(CacheScope::Successful, true)]
    #[case(CacheScope::Always, true)]
    #[case(CacheScope::PerSession, true)]
    #[case(CacheScope::Never, false)]
    #[tokio::test]
    async fn successful_results_are_reused(#[case] scope: CacheScope, #[case] reused: bool) {
        let runner = ProcessRunner::new(Store::memory());
        let req = ProcessRequest::builder(sh("date +%N > out.txt"), "clock")
            .output_file("out.txt")
            .cache_scope(scope)
            .build()
            .unwrap();
        let first = runner.run(&req).await.unwrap();
        let second = runner.run(&req).await.unwrap();
        assert_eq!(second.cached, reused);
        if reused {
            assert_eq!(first.output_digest, second.output_digest);
        }
    }

    #[tokio::test]
    async fn failures_are_not_reused_by_default() {
        let temp_dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(Store::memory());
        let marker = temp_dir.path().join("marker");
        let script = format!("if [ -e '{0}' ]; then echo ok > out.txt; else touch '{0}'; exit 1; fi", marker.display());
        let req = ProcessRequest::builder(sh(&script), "flaky").output_file("out.txt").build().unwrap();
        assert!(runner.run(&req).await.is_err());
        let result = runner.run(&req).await.unwrap();
        assert!(!result.cached);
    }

    #[tokio::test]
    async fn always_scope_replays_failures() {
        let temp_dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(Store::memory());
        let marker = temp_dir.path().join("marker");
        let script = format!("if [ -e '{0}' ]; then exit 0; else touch '{0}'; exit 1; fi", marker.display());
        let req = ProcessRequest::builder(sh(&script), "flaky").cache_scope(CacheScope::Always).build().unwrap();
        assert!(runner.run(&req).await.is_err());
        let err = runner.run(&req).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ProcessExecutionFailure { exit_code: 1, .. }));
    }

    #[tokio::test]
    async fn persistent_cache_survives_runners() {
        let temp_dir = tempfile::tempdir().unwrap();
        let req = ProcessRequest::builder(sh("date +%N > out.txt"), "clock").output_file("out.txt").build().unwrap();
        let first = ProcessRunner::new(Store::local(temp_dir.path()).unwrap()).run(&req).await.unwrap();
        let second = ProcessRunner::new(Store::local(temp_dir.path()).unwrap()).run(&req).await.unwrap();
        assert!(second.cached);
        assert_eq!(first.output_digest, second.output_digest);
    }

    #[tokio::test]
    async fn sandboxes_can_be_kept() {
        let temp_dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(Store::memory()).with_sandbox_root(temp_dir.path()).keep_sandboxes(true);
        let req = ProcessRequest::builder(sh("echo hi > left.txt"), "leave a trace").build().unwrap();
        runner.run(&req).await.unwrap();
        let kept: Vec<_> = std::fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(kept.len(), 1);
        let sandbox = kept[0].as_ref().unwrap().path();
        assert!(sandbox.join("left.txt").exists());
    }

    #[rstest]
    #[case::missing_output(sh("echo hi > left.txt"), None)]
    #[case::timed_out(sh("echo hi > left.txt; sleep 5"), Some(Duration::from_millis(500)))]
    #[tokio::test]
    async fn failed_sandboxes_can_be_kept(#[case] argv: Vec<String>, #[case] timeout: Option<Duration>) {
        let temp_dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(Store::memory()).with_sandbox_root(temp_dir.path()).keep_sandboxes(true);
        let req = ProcessRequest::builder(argv, "leave a trace")
            .output_file("never-written.txt")
            .timeout(timeout)
            .build()
            .unwrap();
        assert!(runner.run(&req).await.is_err());
        let kept: Vec<_> = std::fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(kept.len(), 1);
        assert!(kept[0].as_ref().unwrap().path().join("left.txt").exists());
    }

    #[tokio::test]
    async fn failed_sandboxes_are_removed_by_default() {
        let temp_dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(Store::memory()).with_sandbox_root(temp_dir.path());
        let req = ProcessRequest::builder(sh("true"), "no output").output_file("archive.run").build().unwrap();
        assert!(runner.run(&req).await.is_err());
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }
}
