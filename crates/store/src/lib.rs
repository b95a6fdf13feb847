//! Content-addressed storage of immutable file trees.
//!
//! ```
//! use sfx_store::{FileContent, Store};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::memory();
//! let script = store.create_digest([FileContent::new("run.sh", "echo test").executable(true)]).await?;
//! let staged = store.add_prefix(script, "__archive").await?;
//! assert_eq!(store.snapshot(staged).await?.files, vec![std::path::PathBuf::from("__archive/run.sh")]);
//! # Ok(())
//! # }
//! ```

pub mod backend;
mod digest;
pub mod error;
mod fs;
mod path;
mod store;
mod tree;

pub use crate::backend::BlobBackend;
pub use crate::digest::{Digest, FileContent, Fingerprint, Snapshot};
pub use crate::path::{validate as validate_path, validate_prefix};
pub use crate::store::Store;
pub use crate::tree::{FileNode, Tree};
use std::sync::Arc;

pub type BlobHandle = Arc<dyn BlobBackend + Send + Sync>;
