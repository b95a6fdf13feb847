use crate::create::{CREATE_BINARIES, MakeselfProcess};
use crate::error::{ErrorKind, Result};
use crate::run::{RUN_BINARIES, RunArchive};
use crate::tool::MakeselfExtractor;
use exn::ResultExt;
use sfx_binaries::{BinaryResolver, ShimSet, build_shims};
use sfx_bootstrap::{Bootstrapper, Downloader, ExternalTool, ExtractedTool, Platform};
use sfx_process::{ProcessResult, ProcessRunner};
use sfx_store::Store;
use std::sync::Arc;

/// Everything needed to create and run makeself archives for one build.
pub struct Makeself {
    runner: Arc<ProcessRunner>,
    resolver: Arc<BinaryResolver>,
    bootstrapper: Bootstrapper,
    tool: ExternalTool,
    platform: Platform,
}
impl Makeself {
    pub fn new(
        runner: Arc<ProcessRunner>,
        resolver: Arc<BinaryResolver>,
        downloader: Arc<dyn Downloader>,
        tool: ExternalTool,
        platform: Platform,
    ) -> Self {
        let bootstrapper = Bootstrapper::new(Arc::clone(&runner), Arc::clone(&resolver), downloader);
        Self { runner, resolver, bootstrapper, tool, platform }
    }

    pub fn store(&self) -> &Store {
        self.runner.store()
    }

    pub fn resolver(&self) -> &BinaryResolver {
        &self.resolver
    }

    /// The extracted makeself distribution, bootstrapped on first use.
    pub async fn tool(&self) -> Result<ExtractedTool> {
        self.bootstrapper
            .bootstrap(&self.tool, &MakeselfExtractor, self.platform)
            .await
            .or_raise(|| ErrorKind::Bootstrap)
    }

    async fn shims(&self, names: &[&str], rationale: &str) -> Result<ShimSet> {
        let binaries = self.resolver.resolve_all(names).await.or_raise(|| ErrorKind::Binaries(rationale.to_string()))?;
        build_shims(self.store(), &binaries, rationale).await.or_raise(|| ErrorKind::Binaries(rationale.to_string()))
    }

    /// Runs `makeself.sh` with the tool and the creation shims mounted.
    pub async fn create_archive(&self, process: &MakeselfProcess) -> Result<ProcessResult> {
        let (tool, shims) = tokio::try_join!(self.tool(), self.shims(CREATE_BINARIES, "create makeself archive"))?;
        let req = process.request(&tool, &shims).or_raise(|| ErrorKind::Process)?;
        self.runner.run(&req).await.or_raise(|| ErrorKind::Process)
    }

    /// Executes a built archive non-interactively.
    #[tracing::instrument(skip(self, run), fields(exe = run.exe()))]
    pub async fn run_archive(&self, run: &RunArchive) -> Result<ProcessResult> {
        let shims = self.shims(RUN_BINARIES, "run makeself archive").await?;
        let req = run.request(&shims).or_raise(|| ErrorKind::Process)?;
        self.runner.run(&req).await.or_raise(|| ErrorKind::Process)
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use crate::error::ErrorKind;
    use crate::package::ArchiveRequest;
    use crate::run::RunArchive;
    use crate::testing::{StaticSources, fake_makeself};
    use sfx_process::error::ErrorKind as ProcessErrorKind;
    use sfx_store::FileContent;

    #[tokio::test]
    async fn tool_is_bootstrapped_once() {
        let (makeself, downloader) = fake_makeself();
        let (first, second) = tokio::join!(makeself.tool(), makeself.tool());
        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(downloader.fetches(), 1);
    }

    #[tokio::test]
    async fn runs_a_built_archive() {
        let (makeself, _) = fake_makeself();
        let sources = StaticSources::new(makeself.store().clone());
        sources.add("run.sh", [FileContent::new("run.sh", "echo test")]).await;
        let req = ArchiveRequest::builder("hello", "run.sh").build().unwrap();
        let built = makeself.package(&req, &sources, &sources).await.unwrap();

        let exe = built.artifacts[0].relpath.display().to_string();
        let result = makeself.run_archive(&RunArchive::new(exe, built.digest)).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, b"hello\n");
    }

    #[tokio::test]
    async fn failing_archives_report_exit_code_and_output() {
        let (makeself, _) = fake_makeself();
        let sources = StaticSources::new(makeself.store().clone());
        sources.add("run.sh", [FileContent::new("run.sh", "echo test")]).await;
        // The fake archive echoes its label, so this one also exits non-zero.
        let req = ArchiveRequest::builder("bye", "run.sh").label(Some("bye; exit 3".to_string())).build().unwrap();
        let built = makeself.package(&req, &sources, &sources).await.unwrap();

        let exe = built.artifacts[0].relpath.display().to_string();
        let err = makeself.run_archive(&RunArchive::new(exe, built.digest)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Process));
        let cause = err.frame().children()[0].error().downcast_ref::<ProcessErrorKind>();
        match cause {
            Some(ProcessErrorKind::ProcessExecutionFailure { exit_code, stdout, .. }) => {
                assert_eq!(*exit_code, 3);
                assert_eq!(stdout, b"bye\n");
            },
            other => panic!("unexpected cause: {other:?}"),
        }
    }
}
