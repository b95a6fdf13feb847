//! Discovery of system utilities and the shims that expose them to hermetic
//! processes.
//!
//! A process only ever sees the binaries it declares: each one is resolved to
//! a pinned [`BinaryPath`], then mounted as a tiny wrapper script in its own
//! directory of the sandbox. The resulting [`ShimSet`] carries the mounts and
//! a `PATH` naming exactly those directories.

pub mod error;
mod resolver;
mod shims;

pub use crate::resolver::{BinaryPath, BinaryResolver, SEARCH_PATHS};
pub use crate::shims::{CHROOT, SHIMS_DIR, ShimSet, build_shims};
