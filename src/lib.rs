//! # zipmount
//!
//! Mount a remote ZIP archive as a read-only filesystem without downloading it.
//!
//! The archive's central directory is fetched once with a couple of range
//! requests; file contents are fetched and decompressed on demand, one read
//! at a time.
//!
//! - [`remote`]: byte sources over S3, HTTP(S) and memory
//! - [`archive`]: ZIP central directory parsing and entry streams
//! - [`vfs`]: the immutable path index and resolver
//! - [`fs`]: the filesystem operation surface
//! - `fuse` (feature `fuse`): the kernel boundary and `mount`

pub mod archive;
pub mod config;
pub mod error;
pub mod fs;
#[cfg(feature = "fuse")]
pub mod fuse;
pub mod remote;
pub mod ui;
pub mod vfs;

pub use error::FsError;
pub use fs::{FileAttributes, FilesystemOps, ZipFs};
