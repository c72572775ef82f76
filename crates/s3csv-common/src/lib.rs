//! s3csv Common Library
//!
//! Shared utilities for the s3csv workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CommonError`] and the [`Result`] alias
//! - **Logging**: stderr/file tracing setup driven by [`logging::LogConfig`]
//! - **Compression**: gzip helpers for staged files
//!
//! # Example
//!
//! ```no_run
//! use s3csv_common::compression::gzip_file;
//!
//! fn stage(path: &std::path::Path) -> s3csv_common::Result<()> {
//!     let compressed = gzip_file(path)?;
//!     println!("compressed into {}", compressed.display());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod compression;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{CommonError, Result};
