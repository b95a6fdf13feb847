use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use sfx_makeself::ArchiveRequest;
use sfx_process::CacheScope;
use std::time::Duration;

/// One `[archives.<name>]` table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Directory the archive belongs to; feeds the default output path.
    pub dir: String,
    pub startup_script: String,
    pub files: Vec<String>,
    /// Other archive names, or pre-built paths in the workspace.
    pub packages: Vec<String>,
    pub output_path: Option<String>,
    pub label: Option<String>,
    pub extra_args: Vec<String>,
    pub cache_scope: CacheScope,
    pub timeout_seconds: Option<u64>,
}
impl ArchiveConfig {
    pub(crate) fn validate(&self, name: &str) -> Result<()> {
        if self.startup_script.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid(format!("archives.{name}.startup_script is empty")));
        }
        if self.timeout_seconds == Some(0) {
            exn::bail!(ErrorKind::Invalid(format!("archives.{name}.timeout_seconds must be positive")));
        }
        self.request(name, None).map(|_| ())
    }

    pub fn request(&self, name: &str, default_timeout: Option<Duration>) -> Result<ArchiveRequest> {
        ArchiveRequest::builder(name, &self.startup_script)
            .dir(&self.dir)
            .files(self.files.iter().cloned())
            .packages(self.packages.iter().cloned())
            .output_path(self.output_path.clone())
            .label(self.label.clone())
            .extra_args(self.extra_args.iter().cloned())
            .cache_scope(self.cache_scope)
            .timeout(self.timeout_seconds.map(Duration::from_secs).or(default_timeout))
            .build()
            .or_raise(|| ErrorKind::Invalid(format!("archives.{name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::path::Path;

    fn archive() -> ArchiveConfig {
        ArchiveConfig { startup_script: "run.sh".to_string(), ..Default::default() }
    }

    #[test]
    fn archive_timeout_overrides_the_default() {
        let own = ArchiveConfig { timeout_seconds: Some(5), ..archive() };
        let req = own.request("foo", Some(Duration::from_secs(60))).unwrap();
        assert_eq!(req.timeout(), Some(Duration::from_secs(5)));
        let req = archive().request("foo", Some(Duration::from_secs(60))).unwrap();
        assert_eq!(req.timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn dir_feeds_the_default_output_path() {
        let req = ArchiveConfig { dir: "deploy/linux".to_string(), ..archive() }.request("foo", None).unwrap();
        assert_eq!(req.output_path(), Path::new("deploy_linux/foo.run"));
    }

    #[rstest]
    #[case(ArchiveConfig::default())]
    #[case(ArchiveConfig { timeout_seconds: Some(0), ..archive() })]
    #[case(ArchiveConfig { output_path: Some("../{{ name }}".to_string()), ..archive() })]
    #[case(ArchiveConfig { output_path: Some("{{ name".to_string()), ..archive() })]
    fn invalid_archives(#[case] config: ArchiveConfig) {
        let err = config.validate("foo").unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }
}
