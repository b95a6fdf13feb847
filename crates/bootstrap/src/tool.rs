use crate::error::{ErrorKind, Result};
use crate::platform::Platform;
use std::str::FromStr;

/// One pinned release of a tool for one platform.
///
/// Parsed from rows of the form `version|platform|sha256|size`; whitespace
/// around each field is ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KnownVersion {
    pub version: String,
    pub platform: Platform,
    /// Lowercase hex SHA-256 of the distribution.
    pub sha256: String,
    pub size: u64,
}
impl FromStr for KnownVersion {
    type Err = crate::error::Error;
    fn from_str(row: &str) -> Result<Self> {
        let invalid = || ErrorKind::InvalidKnownVersion(row.to_string());
        let fields: Vec<&str> = row.split('|').map(str::trim).collect();
        let [version, platform, sha256, size] = fields.as_slice() else {
            exn::bail!(invalid());
        };
        if version.is_empty() {
            exn::bail!(invalid());
        }
        let Ok(platform) = platform.parse::<Platform>() else {
            exn::bail!(invalid());
        };
        if !hex::decode(sha256).is_ok_and(|bytes| bytes.len() == 32) {
            exn::bail!(invalid());
        }
        let Ok(size) = size.parse::<u64>() else {
            exn::bail!(invalid());
        };
        Ok(Self { version: version.to_string(), platform, sha256: sha256.to_ascii_lowercase(), size })
    }
}

/// A versioned external tool, downloaded from a URL template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalTool {
    pub name: String,
    pub version: String,
    pub known_versions: Vec<KnownVersion>,
    /// May contain `{version}` and `{platform}` placeholders.
    pub url_template: String,
}

/// What to download for one (tool, version, platform), and how to check it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolDistribution {
    pub url: String,
    pub sha256: String,
    pub size: u64,
    /// Name the downloaded file is stored under.
    pub file_name: String,
}

impl ExternalTool {
    pub fn known_version(&self, platform: Platform) -> Result<&KnownVersion> {
        match self.known_versions.iter().find(|kv| kv.version == self.version && kv.platform == platform) {
            Some(known) => Ok(known),
            None => exn::bail!(ErrorKind::UnknownVersion {
                name: self.name.clone(),
                version: self.version.clone(),
                platform: platform.to_string(),
            }),
        }
    }

    pub fn url(&self, platform: Platform) -> String {
        self.url_template.replace("{version}", &self.version).replace("{platform}", &platform.to_string())
    }

    pub fn distribution(&self, platform: Platform) -> Result<ToolDistribution> {
        let known = self.known_version(platform)?;
        let url = self.url(platform);
        let file_name = url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}-{}", self.name, self.version));
        Ok(ToolDistribution { url, sha256: known.sha256.clone(), size: known.size, file_name })
    }
}
