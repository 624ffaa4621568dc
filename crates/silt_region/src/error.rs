//! Error types for region operations.

use std::io;
use thiserror::Error;

/// Result type for region operations.
pub type RegionResult<T> = Result<T, RegionError>;

/// Errors that can occur while mapping or flushing a region.
#[derive(Debug, Error)]
pub enum RegionError {
    /// Mapping anonymous memory failed.
    #[error("failed to map {len} bytes of anonymous memory: {source}")]
    MapAnonymous {
        /// The requested mapping length.
        len: usize,
        /// The underlying OS error.
        source: io::Error,
    },

    /// Mapping a file window failed.
    #[error("failed to map {len} bytes at file offset {offset}: {source}")]
    MapFile {
        /// The file offset of the window.
        offset: u64,
        /// The requested mapping length.
        len: usize,
        /// The underlying OS error.
        source: io::Error,
    },

    /// Writing dirty pages back to the underlying file failed.
    #[error("failed to flush mapped region: {source}")]
    Flush {
        /// The underlying OS error.
        source: io::Error,
    },
}
