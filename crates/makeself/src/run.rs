use sfx_binaries::ShimSet;
use sfx_process::ProcessRequest;
use sfx_store::Digest;
use std::path::PathBuf;
use tracing::Level;

/// Utilities a makeself archive's header script calls while unpacking.
pub const RUN_BINARIES: &[&str] = &[
    "awk", "base64", "basename", "bash", "cat", "chmod", "cksum", "cut", "dd", "df", "dirname", "expr", "find", "gzip",
    "head", "id", "md5sum", "mkdir", "pwd", "rm", "sed", "tail", "tar", "test", "wc",
];

/// Flags that keep an archive from prompting, drawing progress, opening a
/// terminal window or touching ownership and free space.
const NON_INTERACTIVE: &[&str] = &["--accept", "--noprogress", "--nox11", "--nochown", "--nodiskspace", "--quiet"];

/// Command line for running a makeself archive non-interactively.
///
/// Header options go before `--`, script arguments after it.
pub(crate) fn run_argv(exe: &str, target: Option<&str>, options: &[String], args: &[String]) -> Vec<String> {
    let mut argv = vec![exe.to_string()];
    argv.extend(NON_INTERACTIVE.iter().map(|flag| flag.to_string()));
    argv.extend(options.iter().cloned());
    if let Some(target) = target {
        argv.extend(["--keep".to_string(), "--target".to_string(), target.to_string()]);
    }
    if !args.is_empty() {
        argv.push("--".to_string());
        argv.extend(args.iter().cloned());
    }
    argv
}

/// A request to execute a built archive.
///
/// With an output directory the archive unpacks there and the directory is
/// captured; the startup script still runs afterwards unless
/// [`no_exec`](Self::no_exec) is set.
#[derive(Clone, Debug)]
pub struct RunArchive {
    exe: String,
    input_digest: Digest,
    output_directory: Option<PathBuf>,
    args: Vec<String>,
    check: bool,
    no_exec: bool,
    description: String,
    level: Level,
}
impl RunArchive {
    /// `exe` is the archive's path inside `input_digest`.
    pub fn new(exe: impl Into<String>, input_digest: Digest) -> Self {
        let exe = exe.into();
        Self {
            description: format!("Running makeself archive: {exe}"),
            exe,
            input_digest,
            output_directory: None,
            args: Vec::new(),
            check: false,
            no_exec: false,
            level: Level::INFO,
        }
    }

    /// Unpack into `dir` and keep it.
    pub fn output_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_directory = Some(dir.into());
        self
    }

    /// Arguments for the startup script.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Only verify the embedded checksums.
    pub fn check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }

    pub fn no_exec(mut self, no_exec: bool) -> Self {
        self.no_exec = no_exec;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn exe(&self) -> &str {
        &self.exe
    }

    pub(crate) fn request(&self, shims: &ShimSet) -> sfx_process::error::Result<ProcessRequest> {
        // A bare file name would be looked up on the shim PATH.
        let exe = if self.exe.contains('/') { self.exe.clone() } else { format!("./{}", self.exe) };
        let argv = if self.check {
            run_argv(&exe, None, &["--check".to_string()], &[])
        } else {
            let options = if self.no_exec { vec!["--noexec".to_string()] } else { Vec::new() };
            let target = self.output_directory.as_ref().map(|dir| dir.display().to_string());
            run_argv(&exe, target.as_deref(), &options, &self.args)
        };
        let mut builder = ProcessRequest::builder(argv, &self.description)
            .input_digest(self.input_digest)
            .mounts(shims.mounts().clone())
            .env("PATH", shims.path())
            .level(self.level);
        if let Some(dir) = &self.output_directory
            && !self.check
        {
            builder = builder.output_directory(dir);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfx_binaries::{BinaryPath, build_shims};
    use sfx_store::{Fingerprint, Store};

    async fn shims(store: &Store) -> ShimSet {
        let sh = BinaryPath { name: "sh".to_string(), path: PathBuf::from("/bin/sh"), fingerprint: Fingerprint::of(b"sh") };
        build_shims(store, &[sh], "test").await.unwrap()
    }

    #[test]
    fn non_interactive_flags_come_first() {
        let argv = run_argv("./a.run", None, &[], &[]);
        assert_eq!(argv, ["./a.run", "--accept", "--noprogress", "--nox11", "--nochown", "--nodiskspace", "--quiet"]);
    }

    #[test]
    fn script_args_follow_the_separator() {
        let argv = run_argv("./a.run", Some("out"), &[], &["--flag".to_string(), "x".to_string()]);
        assert_eq!(&argv[7..], ["--keep", "--target", "out", "--", "--flag", "x"]);
    }

    #[tokio::test]
    async fn target_is_a_declared_output() {
        let store = Store::memory();
        let req = RunArchive::new("foo.run", Digest::empty()).output_directory("out").request(&shims(&store).await).unwrap();
        assert_eq!(req.argv()[0], "./foo.run");
        assert!(req.output_directories().contains(std::path::Path::new("out")));
        assert_eq!(req.env().get("PATH").map(String::as_str), Some("{chroot}/__shims/sh"));
        assert_eq!(req.description(), "Running makeself archive: foo.run");
    }

    #[tokio::test]
    async fn check_mode_never_extracts() {
        let store = Store::memory();
        let req = RunArchive::new("dist/foo.run", Digest::empty())
            .output_directory("out")
            .args(["ignored"])
            .check(true)
            .request(&shims(&store).await)
            .unwrap();
        assert_eq!(req.argv().last().map(String::as_str), Some("--check"));
        assert!(req.output_directories().is_empty());
    }

    #[tokio::test]
    async fn no_exec_is_a_header_option() {
        let store = Store::memory();
        let req = RunArchive::new("foo.run", Digest::empty())
            .output_directory("out")
            .no_exec(true)
            .request(&shims(&store).await)
            .unwrap();
        let noexec = req.argv().iter().position(|a| a == "--noexec").unwrap();
        let target = req.argv().iter().position(|a| a == "--target").unwrap();
        assert!(noexec < target);
    }
}
