use crate::error::{ErrorKind, Result};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Platforms external tools are published for.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    #[display("linux_arm64")]
    LinuxArm64,
    #[display("linux_x86_64")]
    LinuxX86_64,
    #[display("macos_arm64")]
    MacosArm64,
    #[display("macos_x86_64")]
    MacosX86_64,
}
impl Platform {
    pub const ALL: [Platform; 4] = [Self::LinuxArm64, Self::LinuxX86_64, Self::MacosArm64, Self::MacosX86_64];

    /// The platform this binary is running on.
    pub fn current() -> Result<Self> {
        Self::from_os_arch(std::env::consts::OS, std::env::consts::ARCH)
    }

    fn from_os_arch(os: &str, arch: &str) -> Result<Self> {
        match (os, arch) {
            ("linux", "x86_64") => Ok(Self::LinuxX86_64),
            ("linux", "aarch64") => Ok(Self::LinuxArm64),
            ("macos", "x86_64") => Ok(Self::MacosX86_64),
            ("macos", "aarch64") => Ok(Self::MacosArm64),
            _ => exn::bail!(ErrorKind::UnsupportedPlatform { os: os.to_string(), arch: arch.to_string() }),
        }
    }
}
impl FromStr for Platform {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self> {
        match Self::ALL.into_iter().find(|p| p.to_string() == s.trim()) {
            Some(platform) => Ok(platform),
            None => exn::bail!(ErrorKind::UnsupportedPlatform { os: s.trim().to_string(), arch: String::new() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("linux", "x86_64", Platform::LinuxX86_64)]
    #[case("linux", "aarch64", Platform::LinuxArm64)]
    #[case("macos", "x86_64", Platform::MacosX86_64)]
    #[case("macos", "aarch64", Platform::MacosArm64)]
    fn detects_supported_platforms(#[case] os: &str, #[case] arch: &str, #[case] expected: Platform) {
        assert_eq!(Platform::from_os_arch(os, arch).unwrap(), expected);
    }

    #[test]
    fn rejects_unsupported_platforms() {
        let err = Platform::from_os_arch("windows", "x86_64").unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedPlatform { os, .. } if os == "windows"));
    }

    #[test]
    fn parses_display_form() {
        for platform in Platform::ALL {
            assert_eq!(platform.to_string().parse::<Platform>().unwrap(), platform);
        }
        assert!("linux_riscv64".parse::<Platform>().is_err());
    }
}
