//! One fixed-size mapped window of a growable file.

use crate::error::{FileError, FileResult};
use silt_region::{Region, RegionError};
use std::fs::File;
use std::path::Path;

/// A mapped view of one fixed-size window of the underlying file,
/// addressed by `block = offset / span`.
///
/// Owned by the [`crate::MappedFile`] that created it, behind an `Arc` so
/// a copy racing a close keeps the mapping alive until it finishes.
/// Unmapped when the last handle drops: either at close, or immediately
/// when a duplicate mapping loses a creation race.
pub(crate) struct Segment {
    region: Region,
}

impl Segment {
    /// Maps the window covering `block`. The file must already span
    /// `(block + 1) * span` bytes.
    pub(crate) fn map(file: &File, block: u64, span: usize, path: &Path) -> FileResult<Self> {
        let offset = block * span as u64;
        let region = Region::map_file(file, offset, span).map_err(|source| FileError::Map {
            path: path.to_path_buf(),
            block,
            source,
        })?;
        Ok(Self { region })
    }

    /// Copies `data` into the segment at `offset`.
    ///
    /// Concurrent callers must keep their ranges disjoint; overlapping
    /// writes leave unspecified contents (the file-level contract).
    pub(crate) fn write(&self, offset: usize, data: &[u8]) {
        // Safety: bounds are checked by the region; range disjointness is
        // the documented caller contract.
        unsafe { self.region.write(offset, data) };
    }

    /// Copies bytes from the segment at `offset` into `buf`.
    pub(crate) fn read(&self, offset: usize, buf: &mut [u8]) {
        // Safety: bounds are checked by the region; see `write`.
        unsafe { self.region.read(offset, buf) };
    }

    /// Writes the segment's dirty pages back to the file.
    pub(crate) fn flush(&self) -> Result<(), RegionError> {
        self.region.flush()
    }
}
