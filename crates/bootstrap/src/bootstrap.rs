use crate::download::{Downloader, verify};
use crate::error::{ErrorKind, Result};
use crate::platform::Platform;
use crate::tool::{ExternalTool, ToolDistribution};
use exn::ResultExt;
use sfx_binaries::{BinaryResolver, build_shims};
use sfx_process::{ProcessRequest, ProcessRunner};
use sfx_store::{Digest, FileContent};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::Level;

/// How a downloaded distribution unpacks itself.
pub trait Extractor: Send + Sync {
    /// System utilities the distribution's self-extraction needs on `PATH`.
    fn required_binaries(&self) -> &[&str];

    /// Directory, relative to the sandbox, the distribution extracts into.
    /// Stripped from the result, so callers never see it.
    fn staging_dir(&self) -> &str;

    /// Command line that extracts `dist` (a sandbox-relative path) into `out_dir`.
    fn extract_argv(&self, dist: &str, out_dir: &str) -> Vec<String>;

    /// The tool's executable, relative to the extracted tree.
    fn exe(&self) -> &Path;
}

/// A tool unpacked into the store, ready to mount.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedTool {
    pub digest: Digest,
    /// Relative to the root of `digest`.
    pub exe: PathBuf,
}

/// Progress of a single tool through the bootstrap.
#[derive(Debug)]
pub enum ToolState {
    Unresolved(ToolDistribution),
    /// Verified download, stored as a single executable file.
    Downloaded { dist: ToolDistribution, digest: Digest },
    /// Raw extraction output, still below the staging directory.
    Extracted(Digest),
    Ready(ExtractedTool),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ToolKey {
    name: String,
    version: String,
    platform: Platform,
}

/// Final state of one bootstrap, failures included.
type Outcome = std::result::Result<ExtractedTool, ErrorKind>;

/// Turns [`ExternalTool`]s into [`ExtractedTool`]s, at most once per
/// (name, version, platform).
///
/// The outcome is remembered either way: once a download or extraction has
/// failed, every caller waiting on the same key gets that failure instead of
/// starting another download.
pub struct Bootstrapper {
    runner: Arc<ProcessRunner>,
    resolver: Arc<BinaryResolver>,
    downloader: Arc<dyn Downloader>,
    outcomes: Mutex<HashMap<ToolKey, Arc<Mutex<Option<Outcome>>>>>,
}
impl Bootstrapper {
    pub fn new(runner: Arc<ProcessRunner>, resolver: Arc<BinaryResolver>, downloader: Arc<dyn Downloader>) -> Self {
        Self { runner, resolver, downloader, outcomes: Mutex::new(HashMap::new()) }
    }

    #[tracing::instrument(skip(self, tool, extractor), fields(tool = %tool.name, version = %tool.version))]
    pub async fn bootstrap(&self, tool: &ExternalTool, extractor: &dyn Extractor, platform: Platform) -> Result<ExtractedTool> {
        let key = ToolKey { name: tool.name.clone(), version: tool.version.clone(), platform };
        let slot = Arc::clone(self.outcomes.lock().await.entry(key).or_default());
        let mut outcome = slot.lock().await;
        if let Some(outcome) = outcome.as_ref() {
            return outcome.clone().map_err(exn::Exn::new);
        }
        let result = self.run_to_ready(tool, extractor, platform).await;
        *outcome = Some(match &result {
            Ok(ready) => Ok(ready.clone()),
            Err(err) => Err(ErrorKind::clone(err)),
        });
        result
    }

    async fn run_to_ready(&self, tool: &ExternalTool, extractor: &dyn Extractor, platform: Platform) -> Result<ExtractedTool> {
        let mut state = ToolState::Unresolved(tool.distribution(platform)?);
        loop {
            state = match self.advance(tool, extractor, state).await? {
                ToolState::Ready(ready) => return Ok(ready),
                next => next,
            };
        }
    }

    /// Performs one step of the bootstrap.
    pub async fn advance(&self, tool: &ExternalTool, extractor: &dyn Extractor, state: ToolState) -> Result<ToolState> {
        let store = self.runner.store();
        match state {
            ToolState::Unresolved(dist) => {
                tracing::debug!(url = %dist.url, "Downloading {}", tool.name);
                let bytes = self.downloader.fetch(&dist.url).await?;
                verify(&dist, &bytes)?;
                let file = FileContent::new(&dist.file_name, bytes).executable(true);
                let digest = store.create_digest([file]).await.or_raise(|| ErrorKind::Store)?;
                Ok(ToolState::Downloaded { dist, digest })
            },
            ToolState::Downloaded { dist, digest } => {
                let binaries = self.resolver.resolve_all(extractor.required_binaries()).await.or_raise(|| ErrorKind::Binaries)?;
                let rationale = format!("extract {}", tool.name);
                let shims = build_shims(store, &binaries, &rationale).await.or_raise(|| ErrorKind::Binaries)?;
                let argv = extractor.extract_argv(&format!("./{}", dist.file_name), extractor.staging_dir());
                let req = ProcessRequest::builder(argv, format!("Extract {} {}", tool.name, tool.version))
                    .input_digest(digest)
                    .mounts(shims.mounts().clone())
                    .env("PATH", shims.path())
                    .output_directory(extractor.staging_dir())
                    .level(Level::DEBUG)
                    .build()
                    .or_raise(|| ErrorKind::Extraction(tool.name.clone()))?;
                let result = self.runner.run(&req).await.or_raise(|| ErrorKind::Extraction(tool.name.clone()))?;
                Ok(ToolState::Extracted(result.output_digest))
            },
            ToolState::Extracted(raw) => {
                let digest = store.remove_prefix(raw, extractor.staging_dir()).await.or_raise(|| ErrorKind::Store)?;
                let tree = store.tree(&digest).await.or_raise(|| ErrorKind::Store)?;
                if tree.get(extractor.exe()).is_none() {
                    exn::bail!(ErrorKind::MissingExecutable(extractor.exe().to_path_buf()));
                }
                Ok(ToolState::Ready(ExtractedTool { digest, exe: extractor.exe().to_path_buf() }))
            },
            ready @ ToolState::Ready(_) => Ok(ready),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::mock::MockDownloader;
    use crate::tool::KnownVersion;
    use sfx_store::Store;

    const URL: &str = "https://example.com/fake-1.0.run";

    /// Extracts itself by writing a single `fake.sh` into `--target`.
    const FAKE_DIST: &str = r#"#!/bin/sh
target=""
while [ $# -gt 0 ]; do
    case "$1" in
        --target) target="$2"; shift 2 ;;
        *) shift ;;
    esac
done
mkdir -p "$target"
printf '#!/bin/sh\necho fake\n' > "$target/fake.sh"
chmod +x "$target/fake.sh"
"#;

    struct FakeExtractor {
        exe: PathBuf,
    }
    impl Extractor for FakeExtractor {
        fn required_binaries(&self) -> &[&str] {
            &["mkdir", "chmod"]
        }

        fn staging_dir(&self) -> &str {
            "__fake"
        }

        fn extract_argv(&self, dist: &str, out_dir: &str) -> Vec<String> {
            vec![dist.to_string(), "--keep".to_string(), "--target".to_string(), out_dir.to_string()]
        }

        fn exe(&self) -> &Path {
            &self.exe
        }
    }

    fn tool_for(bytes: &[u8]) -> ExternalTool {
        use sha2::{Digest as _, Sha256};
        let platform = Platform::current().unwrap();
        let row = format!("1.0|{platform}|{}|{}", hex::encode(Sha256::digest(bytes)), bytes.len());
        ExternalTool {
            name: "fake".to_string(),
            version: "1.0".to_string(),
            known_versions: vec![row.parse::<KnownVersion>().unwrap()],
            url_template: "https://example.com/fake-{version}.run".to_string(),
        }
    }

    fn bootstrapper(downloader: Arc<MockDownloader>) -> Bootstrapper {
        let runner = Arc::new(ProcessRunner::new(Store::memory()));
        Bootstrapper::new(runner, Arc::new(BinaryResolver::default()), downloader)
    }

    #[tokio::test]
    async fn bootstraps_and_strips_staging_dir() {
        let downloader = Arc::new(MockDownloader::with_urls([(URL, FAKE_DIST.as_bytes().to_vec())]));
        let bootstrapper = bootstrapper(Arc::clone(&downloader));
        let extractor = FakeExtractor { exe: PathBuf::from("fake.sh") };
        let tool = tool_for(FAKE_DIST.as_bytes());
        let platform = Platform::current().unwrap();

        let ready = bootstrapper.bootstrap(&tool, &extractor, platform).await.unwrap();
        assert_eq!(ready.exe, Path::new("fake.sh"));
        let files = bootstrapper.runner.store().snapshot(ready.digest).await.unwrap().files;
        assert_eq!(files, vec![PathBuf::from("fake.sh")]);

        // Converges on the same value without downloading again.
        let again = bootstrapper.bootstrap(&tool, &extractor, platform).await.unwrap();
        assert_eq!(again, ready);
        assert_eq!(downloader.fetches(), 1);
    }

    #[tokio::test]
    async fn checksum_mismatch_stops_before_extraction() {
        let downloader = Arc::new(MockDownloader::with_urls([(URL, b"#!/bin/sh\nexit 0\n".to_vec())]));
        let bootstrapper = bootstrapper(Arc::clone(&downloader));
        // Pinned to the real script, served something else of a different size.
        let tool = tool_for(FAKE_DIST.as_bytes());
        let extractor = FakeExtractor { exe: PathBuf::from("fake.sh") };
        let platform = Platform::current().unwrap();

        let err = bootstrapper.bootstrap(&tool, &extractor, platform).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ChecksumMismatch { url, .. } if url == URL));

        // The failure is final for this bootstrapper: no second download.
        let err = bootstrapper.bootstrap(&tool, &extractor, platform).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ChecksumMismatch { url, .. } if url == URL));
        assert_eq!(downloader.fetches(), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_failed_download() {
        let downloader = Arc::new(MockDownloader::with_urls([(URL, b"tampered".to_vec())]));
        let bootstrapper = bootstrapper(Arc::clone(&downloader));
        let tool = tool_for(b"original");
        let extractor = FakeExtractor { exe: PathBuf::from("fake.sh") };
        let platform = Platform::current().unwrap();

        let (first, second) = tokio::join!(
            bootstrapper.bootstrap(&tool, &extractor, platform),
            bootstrapper.bootstrap(&tool, &extractor, platform),
        );
        assert!(matches!(&*first.unwrap_err(), ErrorKind::ChecksumMismatch { .. }));
        assert!(matches!(&*second.unwrap_err(), ErrorKind::ChecksumMismatch { .. }));
        assert_eq!(downloader.fetches(), 1);
    }

    #[tokio::test]
    async fn checksum_mismatch_never_reaches_the_downloaded_state() {
        let downloader = Arc::new(MockDownloader::with_urls([(URL, b"tampered".to_vec())]));
        let bootstrapper = bootstrapper(downloader);
        let tool = tool_for(b"original");
        let extractor = FakeExtractor { exe: PathBuf::from("fake.sh") };
        let dist = tool.distribution(Platform::current().unwrap()).unwrap();
        let err = bootstrapper.advance(&tool, &extractor, ToolState::Unresolved(dist)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn missing_executable_is_reported() {
        let downloader = Arc::new(MockDownloader::with_urls([(URL, FAKE_DIST.as_bytes().to_vec())]));
        let bootstrapper = bootstrapper(downloader);
        let extractor = FakeExtractor { exe: PathBuf::from("bin/not-there") };
        let tool = tool_for(FAKE_DIST.as_bytes());
        let err = bootstrapper.bootstrap(&tool, &extractor, Platform::current().unwrap()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MissingExecutable(p) if p == Path::new("bin/not-there")));
    }

    #[tokio::test]
    async fn unknown_version_fails_without_download() {
        let downloader = Arc::new(MockDownloader::with_urls([(URL, FAKE_DIST.as_bytes().to_vec())]));
        let bootstrapper = bootstrapper(Arc::clone(&downloader));
        let tool = ExternalTool { version: "9.9".to_string(), ..tool_for(FAKE_DIST.as_bytes()) };
        let extractor = FakeExtractor { exe: PathBuf::from("fake.sh") };
        let err = bootstrapper.bootstrap(&tool, &extractor, Platform::current().unwrap()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnknownVersion { .. }));
        assert_eq!(downloader.fetches(), 0);
    }
}
