use crate::tool::TOOL_DIR;
use sfx_binaries::ShimSet;
use sfx_bootstrap::ExtractedTool;
use sfx_process::{CacheScope, ProcessRequest};
use sfx_store::Digest;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Utilities `makeself.sh` calls while building an archive.
pub const CREATE_BINARIES: &[&str] = &[
    "awk", "basename", "cat", "chmod", "cksum", "cut", "date", "dirname", "du", "expr", "find", "gzip", "rm", "sed",
    "sh", "sort", "tar", "tr", "wc", "xargs",
];

/// One invocation of `makeself.sh` inside a sandbox.
///
/// Usually built with [`archive`](Self::archive); [`new`](Self::new) runs
/// any other command line, such as `--help` or `--lsm`.
#[derive(Clone, Debug)]
pub struct MakeselfProcess {
    options: Vec<String>,
    operands: Vec<String>,
    input_digest: Digest,
    description: String,
    level: Level,
    cache_scope: CacheScope,
    timeout: Option<Duration>,
    output_filename: Option<PathBuf>,
}
impl MakeselfProcess {
    pub fn new(args: impl IntoIterator<Item = impl Into<String>>, description: impl Into<String>) -> Self {
        Self {
            options: args.into_iter().map(Into::into).collect(),
            operands: Vec::new(),
            input_digest: Digest::empty(),
            description: description.into(),
            level: Level::INFO,
            cache_scope: CacheScope::default(),
            timeout: None,
            output_filename: None,
        }
    }

    /// Packs `archive_dir` into `file_name`, running `startup_script`
    /// (relative to `archive_dir`) on extraction.
    pub fn archive(archive_dir: &str, file_name: &str, label: &str, startup_script: &Path) -> Self {
        let script = Path::new(".").join(startup_script);
        Self {
            operands: vec![
                archive_dir.to_string(),
                file_name.to_string(),
                label.to_string(),
                script.display().to_string(),
            ],
            output_filename: Some(PathBuf::from(file_name)),
            ..Self::new(Vec::<String>::new(), format!("Creating makeself archive: {file_name}"))
        }
    }

    /// Extra `makeself.sh` options, placed before the operands.
    pub fn options(mut self, options: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.options.extend(options.into_iter().map(Into::into));
        self
    }

    pub fn input_digest(mut self, digest: Digest) -> Self {
        self.input_digest = digest;
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

    pub fn cache_scope(mut self, scope: CacheScope) -> Self {
        self.cache_scope = scope;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn output_filename(&self) -> Option<&Path> {
        self.output_filename.as_deref()
    }

    pub fn argv(&self, tool: &ExtractedTool) -> Vec<String> {
        let exe = Path::new(TOOL_DIR).join(&tool.exe);
        std::iter::once(exe.display().to_string())
            .chain(self.options.iter().cloned())
            .chain(self.operands.iter().cloned())
            .collect()
    }

    pub(crate) fn request(&self, tool: &ExtractedTool, shims: &ShimSet) -> sfx_process::error::Result<ProcessRequest> {
        let mut builder = ProcessRequest::builder(self.argv(tool), &self.description)
            .input_digest(self.input_digest)
            .mount(TOOL_DIR, tool.digest)
            .mounts(shims.mounts().clone())
            .env("PATH", shims.path())
            .cache_scope(self.cache_scope)
            .timeout(self.timeout)
            .level(self.level);
        if let Some(output) = &self.output_filename {
            builder = builder.output_file(output);
        }
        builder.build()
    }
}
