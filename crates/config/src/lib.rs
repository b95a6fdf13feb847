//! Layered configuration.
//!
//! Sources, later ones overriding earlier ones:
//!
//! 1. built-in defaults;
//! 2. `sfx.toml`, `sfx.yaml` and `sfx.json` in the working directory, or a
//!    single explicitly named file;
//! 3. `SFX_*` environment variables, with `__` separating nested keys
//!    (`SFX_MAKESELF__VERSION=2.5.0`).
//!
//! ```toml
//! [store]
//! persistent = false
//!
//! [archives.installer]
//! startup_script = "deploy/install.sh"
//! files = ["deploy/data"]
//! extra_args = ["--packaging-date", "Thu Jan  1 00:00:00 UTC 1970"]
//! ```

mod archive;
pub mod error;

pub use crate::archive::ArchiveConfig;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use sfx_bootstrap::{ExternalTool, KnownVersion};
use sfx_makeself::ArchiveRequest;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "SFX_";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub makeself: MakeselfConfig,
    pub binaries: BinariesConfig,
    pub store: StoreConfig,
    pub process: ProcessConfig,
    pub archives: BTreeMap<String, ArchiveConfig>,
}

/// Which makeself release to bootstrap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MakeselfConfig {
    pub version: String,
    /// Rows of `version|platform|sha256|size`.
    pub known_versions: Vec<String>,
    pub url_template: String,
}
impl Default for MakeselfConfig {
    fn default() -> Self {
        Self {
            version: sfx_makeself::DEFAULT_VERSION.to_string(),
            known_versions: sfx_makeself::DEFAULT_KNOWN_VERSIONS.iter().map(|row| row.to_string()).collect(),
            url_template: sfx_makeself::DEFAULT_URL_TEMPLATE.to_string(),
        }
    }
}
impl MakeselfConfig {
    pub fn tool(&self) -> Result<ExternalTool> {
        let mut known_versions = Vec::with_capacity(self.known_versions.len());
        for row in &self.known_versions {
            let known = row
                .parse::<KnownVersion>()
                .or_raise(|| ErrorKind::Invalid(format!("makeself.known_versions: {row:?}")))?;
            known_versions.push(known);
        }
        if self.url_template.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("makeself.url_template is empty".to_string()));
        }
        Ok(ExternalTool {
            name: "makeself".to_string(),
            version: self.version.clone(),
            known_versions,
            url_template: self.url_template.clone(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinariesConfig {
    /// Searched in order for system utilities.
    pub search_paths: Vec<PathBuf>,
}
impl Default for BinariesConfig {
    fn default() -> Self {
        Self { search_paths: sfx_binaries::SEARCH_PATHS.iter().map(PathBuf::from).collect() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Defaults to `sfx/store` in the user's cache directory.
    pub root: Option<PathBuf>,
    /// Keep blobs and process results between runs.
    pub persistent: bool,
}
impl Default for StoreConfig {
    fn default() -> Self {
        Self { root: None, persistent: true }
    }
}
impl StoreConfig {
    /// Where the persistent store lives, or `None` when it is in memory.
    pub fn resolved_root(&self) -> Option<PathBuf> {
        if !self.persistent {
            return None;
        }
        self.root.clone().or_else(|| {
            directories::ProjectDirs::from("", "", "sfx").map(|dirs| dirs.cache_dir().join("store"))
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Defaults to the system temporary directory.
    pub sandbox_root: Option<PathBuf>,
    pub keep_sandboxes: bool,
    /// Applies to archives that do not set their own timeout.
    pub timeout_seconds: Option<u64>,
}

impl Config {
    /// Loads from the working directory and the environment.
    pub fn load() -> Result<Self> {
        Self::extract(Self::figment(None), "the working directory and environment")
    }

    /// Loads from one file (format chosen by extension) and the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        Self::extract(Self::figment(Some(path)), &path.display().to_string())
    }

    pub fn figment(file: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(Config::default()));
        let figment = match file {
            Some(path) => match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
                Some("json") => figment.merge(Json::file_exact(path)),
                _ => figment.merge(Toml::file_exact(path)),
            },
            None => figment.merge(Toml::file("sfx.toml")).merge(Yaml::file("sfx.yaml")).merge(Json::file("sfx.json")),
        };
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn extract(figment: Figment, source: &str) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Load(source.to_string()))?;
        config.validate()?;
        tracing::debug!(archives = config.archives.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.makeself.tool()?;
        if self.binaries.search_paths.is_empty() {
            exn::bail!(ErrorKind::Invalid("binaries.search_paths is empty".to_string()));
        }
        if let Some(path) = self.binaries.search_paths.iter().find(|p| !p.is_absolute()) {
            exn::bail!(ErrorKind::Invalid(format!("binaries.search_paths: {} is not absolute", path.display())));
        }
        if self.process.timeout_seconds == Some(0) {
            exn::bail!(ErrorKind::Invalid("process.timeout_seconds must be positive".to_string()));
        }
        for (name, archive) in &self.archives {
            archive.validate(name)?;
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.process.timeout_seconds.map(Duration::from_secs)
    }

    /// Every configured archive as a ready-to-build request.
    pub fn archive_requests(&self) -> Result<Vec<ArchiveRequest>> {
        self.archives.iter().map(|(name, archive)| archive.request(name, self.timeout())).collect()
    }
}
