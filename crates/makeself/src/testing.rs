//! Test doubles: a fake makeself release served from memory, and a source
//! resolver over in-memory files.

use crate::error::{ErrorKind, Result};
use crate::makeself::Makeself;
use crate::package::{BuiltPackage, PackageBuilder, SourceResolver};
use crate::tool::{DEFAULT_URL_TEMPLATE, DEFAULT_VERSION};
use async_trait::async_trait;
use exn::ResultExt;
use sfx_binaries::BinaryResolver;
use sfx_bootstrap::{ExternalTool, KnownVersion, MockDownloader, Platform};
use sfx_process::ProcessRunner;
use sfx_store::{FileContent, Snapshot, Store};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Unpacks a `makeself.sh` that writes a listing of the archive directory
/// instead of a real archive.
const FAKE_RELEASE: &str = r##"#!/bin/sh
target=""
while [ $# -gt 0 ]; do
    case "$1" in
        --target) target="$2"; shift 2 ;;
        *) shift ;;
    esac
done
mkdir -p "$target"
cat > "$target/makeself.sh" <<'EOF'
#!/bin/sh
dir="$1"; out="$2"; label="$3"; script="$4"
{
    echo '#!/bin/sh'
    echo "# label: $label"
    echo "# startup: $script"
    (cd "$dir" && find . -type f | sort | while read -r f; do
        if [ -x "$f" ]; then echo "# $f x"; else echo "# $f -"; fi
    done)
    echo "echo $label"
} > "$out"
chmod +x "$out"
EOF
chmod +x "$target/makeself.sh"
"##;

pub(crate) fn fake_makeself() -> (Makeself, Arc<MockDownloader>) {
    use sha2::{Digest as _, Sha256};
    let platform = Platform::current().unwrap();
    let url = DEFAULT_URL_TEMPLATE.replace("{version}", DEFAULT_VERSION);
    let sha256 = hex::encode(Sha256::digest(FAKE_RELEASE.as_bytes()));
    let row = format!("{DEFAULT_VERSION}|{platform}|{sha256}|{}", FAKE_RELEASE.len());
    let tool = ExternalTool {
        name: "makeself".to_string(),
        version: DEFAULT_VERSION.to_string(),
        known_versions: vec![row.parse::<KnownVersion>().unwrap()],
        url_template: DEFAULT_URL_TEMPLATE.to_string(),
    };
    let downloader = Arc::new(MockDownloader::with_urls([(url, FAKE_RELEASE.as_bytes().to_vec())]));
    let runner = Arc::new(ProcessRunner::new(Store::memory()));
    let makeself = Makeself::new(runner, Arc::new(BinaryResolver::default()), Arc::<MockDownloader>::clone(&downloader), tool, platform);
    (makeself, downloader)
}

/// Named groups of in-memory files.
pub(crate) struct StaticSources {
    store: Store,
    entries: RwLock<HashMap<String, Snapshot>>,
}
impl StaticSources {
    pub fn new(store: Store) -> Self {
        Self { store, entries: RwLock::new(HashMap::new()) }
    }

    pub async fn add(&self, reference: &str, files: impl IntoIterator<Item = FileContent>) {
        let digest = self.store.create_digest(files).await.unwrap();
        let snapshot = self.store.snapshot(digest).await.unwrap();
        self.entries.write().await.insert(reference.to_string(), snapshot);
    }
}

#[async_trait]
impl SourceResolver for StaticSources {
    async fn resolve(&self, reference: &str) -> Result<Snapshot> {
        match self.entries.read().await.get(reference) {
            Some(snapshot) => Ok(snapshot.clone()),
            None => exn::bail!(ErrorKind::Source(reference.to_string())),
        }
    }
}

#[async_trait]
impl PackageBuilder for StaticSources {
    async fn build(&self, reference: &str) -> Result<BuiltPackage> {
        let snapshot = self.resolve(reference).await.or_raise(|| ErrorKind::Package(reference.to_string()))?;
        Ok(BuiltPackage { digest: snapshot.digest, artifacts: snapshot.files })
    }
}
