//! Self-extracting archives built with [makeself](https://makeself.io).
//!
//! [`Makeself`] ties the pieces together for one build: it bootstraps the
//! pinned makeself release, builds the hermetic shims `makeself.sh` needs,
//! and runs it through the sandboxed process runner.
//!
//! Packaging an [`ArchiveRequest`] goes:
//!
//! 1. resolve the startup script, loose files and packages concurrently;
//! 2. merge them into one tree, failing on conflicting paths;
//! 3. stage the tree under `__archive` and run `makeself.sh` on it;
//! 4. move the single produced file to the rendered [`OutputPath`].

mod create;
pub mod error;
mod makeself;
mod output;
mod package;
mod project;
mod run;
#[cfg(test)]
mod testing;
mod tool;
mod workspace;

pub use crate::create::{CREATE_BINARIES, MakeselfProcess};
pub use crate::makeself::Makeself;
pub use crate::output::{DEFAULT_EXTENSION, DEFAULT_TEMPLATE, OutputPath};
pub use crate::package::{
    ARCHIVE_DIR, ArchiveRequest, ArchiveRequestBuilder, BuiltArchive, BuiltArchiveArtifact, BuiltPackage,
    PackageBuilder, SourceResolver,
};
pub use crate::project::Project;
pub use crate::run::{RUN_BINARIES, RunArchive};
pub use crate::tool::{
    DEFAULT_KNOWN_VERSIONS, DEFAULT_URL_TEMPLATE, DEFAULT_VERSION, MakeselfExtractor, TOOL_DIR, makeself_tool,
};
pub use crate::workspace::WorkspaceSources;
