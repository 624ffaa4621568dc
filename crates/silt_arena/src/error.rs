//! Error types for arena operations.

use silt_region::RegionError;
use thiserror::Error;

/// Result type for arena operations.
pub type ArenaResult<T> = Result<T, ArenaError>;

/// Errors that can occur while allocating from an arena.
#[derive(Debug, Error)]
pub enum ArenaError {
    /// Mapping the backing region for a new block failed.
    #[error("failed to map arena block of {bytes} bytes: {source}")]
    BlockMap {
        /// The requested block size (page-rounded).
        bytes: usize,
        /// The underlying mapping error.
        source: RegionError,
    },
}
