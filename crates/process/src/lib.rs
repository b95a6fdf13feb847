//! Hermetic process execution.
//!
//! A [`ProcessRequest`] names everything a process may see: an input digest,
//! read-only mounts and an explicit environment. The [`ProcessRunner`]
//! materialises those into a throwaway sandbox, runs the process, and reads
//! back only the declared outputs. Results are cached by request fingerprint
//! according to the request's [`CacheScope`].
//!
//! ```no_run
//! use sfx_process::{ProcessRequest, ProcessRunner};
//! use sfx_store::Store;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let runner = ProcessRunner::new(Store::memory());
//! let req = ProcessRequest::builder(["/bin/sh", "-c", "echo test > out.txt"], "Write a file")
//!     .output_file("out.txt")
//!     .build()?;
//! let result = runner.run(&req).await?;
//! assert_eq!(runner.store().snapshot(result.output_digest).await?.files.len(), 1);
//! # Ok(())
//! # }
//! ```

mod cache;
pub mod error;
mod request;
mod runner;

pub use crate::request::{CacheScope, ProcessRequest, ProcessRequestBuilder};
pub use crate::runner::{ProcessResult, ProcessRunner};
