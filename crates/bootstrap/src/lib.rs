//! Hermetic bootstrap of versioned external tools.
//!
//! Each tool goes through the same states, once per (name, version,
//! platform):
//!
//! 1. **Unresolved**: download the pinned URL, verify size and SHA-256.
//! 2. **Downloaded**: run the distribution's own self-extraction in a
//!    sandbox that only sees the shims its [`Extractor`] asks for.
//! 3. **Extracted**: strip the staging directory from the output.
//! 4. **Ready**: an [`ExtractedTool`] (digest plus relative executable).
//!
//! A checksum mismatch is fatal and happens before anything is executed.

mod bootstrap;
mod download;
pub mod error;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod platform;
mod tool;

pub use crate::bootstrap::{Bootstrapper, ExtractedTool, Extractor, ToolState};
pub use crate::download::{Downloader, UrlDownloader, verify};
#[cfg(any(test, feature = "mock"))]
pub use crate::mock::MockDownloader;
pub use crate::platform::Platform;
pub use crate::tool::{ExternalTool, KnownVersion, ToolDistribution};
