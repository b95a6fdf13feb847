use crate::run::{RUN_BINARIES, run_argv};
use sfx_bootstrap::{ExternalTool, Extractor, KnownVersion};
use std::path::Path;

pub const DEFAULT_VERSION: &str = "2.5.0";

/// Pinned releases: `version|platform|sha256|size`. The release is a shell
/// archive, so every platform shares one checksum.
pub const DEFAULT_KNOWN_VERSIONS: &[&str] = &[
    "2.5.0|macos_arm64 |4d2fa9d898be22c63bb3c6bb7cc3dc97237700dea6d6ad898dcbec0289df0bc4|45867",
    "2.5.0|macos_x86_64|4d2fa9d898be22c63bb3c6bb7cc3dc97237700dea6d6ad898dcbec0289df0bc4|45867",
    "2.5.0|linux_arm64 |4d2fa9d898be22c63bb3c6bb7cc3dc97237700dea6d6ad898dcbec0289df0bc4|45867",
    "2.5.0|linux_x86_64|4d2fa9d898be22c63bb3c6bb7cc3dc97237700dea6d6ad898dcbec0289df0bc4|45867",
];

pub const DEFAULT_URL_TEMPLATE: &str =
    "https://github.com/megastep/makeself/releases/download/release-{version}/makeself-{version}.run";

/// Where the tool is mounted inside sandboxes, and where it extracts itself.
pub const TOOL_DIR: &str = "__makeself";

const EXE: &str = "makeself.sh";

/// The makeself [`ExternalTool`] with the pinned defaults.
pub fn makeself_tool() -> sfx_bootstrap::error::Result<ExternalTool> {
    Ok(ExternalTool {
        name: "makeself".to_string(),
        version: DEFAULT_VERSION.to_string(),
        known_versions: DEFAULT_KNOWN_VERSIONS.iter().map(|row| row.parse::<KnownVersion>()).collect::<Result<_, _>>()?,
        url_template: DEFAULT_URL_TEMPLATE.to_string(),
    })
}

/// Makeself releases are makeself archives themselves: running one with
/// `--keep --target` unpacks `makeself.sh` and its header.
#[derive(Clone, Copy, Debug, Default)]
pub struct MakeselfExtractor;

impl Extractor for MakeselfExtractor {
    fn required_binaries(&self) -> &[&str] {
        RUN_BINARIES
    }

    fn staging_dir(&self) -> &str {
        TOOL_DIR
    }

    fn extract_argv(&self, dist: &str, out_dir: &str) -> Vec<String> {
        run_argv(dist, Some(out_dir), &[], &[])
    }

    fn exe(&self) -> &Path {
        Path::new(EXE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfx_bootstrap::Platform;

    #[test]
    fn defaults_cover_every_platform() {
        let tool = makeself_tool().unwrap();
        for platform in Platform::ALL {
            let dist = tool.distribution(platform).unwrap();
            assert_eq!(dist.file_name, "makeself-2.5.0.run");
            assert_eq!(dist.size, 45867);
        }
    }

    #[test]
    fn extracts_into_the_tool_dir() {
        let argv = MakeselfExtractor.extract_argv("./makeself-2.5.0.run", TOOL_DIR);
        assert_eq!(argv.first().map(String::as_str), Some("./makeself-2.5.0.run"));
        assert!(argv.ends_with(&["--keep".to_string(), "--target".to_string(), TOOL_DIR.to_string()]));
        assert_eq!(MakeselfExtractor.exe(), Path::new("makeself.sh"));
    }
}
