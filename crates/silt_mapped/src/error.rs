//! Error types for mapped-file operations.

use silt_region::RegionError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for mapped-file operations.
pub type FileResult<T> = Result<T, FileError>;

/// Errors that can occur on a mapped file.
///
/// Every variant names the file and the failing step; all of them are
/// recoverable at the caller's discretion.
#[derive(Debug, Error)]
pub enum FileError {
    /// Opening or creating the file failed.
    #[error("{}: open failed: {source}", .path.display())]
    Open {
        /// The file path.
        path: PathBuf,
        /// The underlying OS error.
        source: io::Error,
    },

    /// Truncating the file (growth or close) failed.
    #[error("{}: truncate to {len} bytes failed: {source}", .path.display())]
    Truncate {
        /// The file path.
        path: PathBuf,
        /// The requested file length.
        len: u64,
        /// The underlying OS error.
        source: io::Error,
    },

    /// Creating a segment mapping failed.
    #[error("{}: mapping segment {block} failed: {source}", .path.display())]
    Map {
        /// The file path.
        path: PathBuf,
        /// The segment's block index.
        block: u64,
        /// The underlying mapping error.
        source: RegionError,
    },

    /// Flushing one segment's dirty pages failed.
    #[error("{}: flushing segment {block} failed: {source}", .path.display())]
    SegmentFlush {
        /// The file path.
        path: PathBuf,
        /// The segment's block index.
        block: u64,
        /// The underlying flush error.
        source: RegionError,
    },

    /// Flushing the file handle's OS buffers failed.
    #[error("{}: flushing file buffers failed: {source}", .path.display())]
    HandleFlush {
        /// The file path.
        path: PathBuf,
        /// The underlying OS error.
        source: io::Error,
    },

    /// The file has been closed.
    #[error("{}: file is closed", .path.display())]
    Closed {
        /// The file path.
        path: PathBuf,
    },

    /// Attempted to read beyond the written end of the file.
    #[error(
        "{}: read beyond end of file: offset {offset}, len {len}, size {size}",
        .path.display()
    )]
    ReadPastEnd {
        /// The file path.
        path: PathBuf,
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The written length of the file.
        size: u64,
    },
}

impl FileError {
    /// Creates a closed-file error.
    pub(crate) fn closed(path: &Path) -> Self {
        Self::Closed {
            path: path.to_path_buf(),
        }
    }
}
