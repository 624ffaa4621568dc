//! One backing memory block of an arena.

use crate::error::{ArenaError, ArenaResult};
use silt_region::Region;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize};

/// One mapped backing region with two independent bump cursors.
///
/// `next_lower` grows upward from offset 0; `next_upper` shrinks downward
/// from the block's capacity. `rem` is the reservation counter gating
/// concurrent requests before either cursor actually moves: after any
/// completed operation, `0 <= next_lower <= next_upper <= capacity` holds.
///
/// A block is destroyed only when its owning arena is dropped, which
/// releases the mapped region.
pub(crate) struct Block {
    /// Intrusive link to the previously installed block.
    pub(crate) next: AtomicPtr<Block>,
    /// Bytes still reservable, logically `next_upper - next_lower`.
    pub(crate) rem: AtomicUsize,
    /// Offset of the next low-end allocation.
    pub(crate) next_lower: AtomicUsize,
    /// Offset one past the last high-end allocation.
    pub(crate) next_upper: AtomicUsize,
    region: Region,
}

impl Block {
    /// Maps a new block of at least `bytes` bytes, rounded up to whole
    /// pages.
    pub(crate) fn map(bytes: usize, page_size: usize) -> ArenaResult<Self> {
        let size = bytes
            .checked_add(page_size - 1)
            .expect("arena block size overflow")
            & !(page_size - 1);
        let region = Region::map_anonymous(size)
            .map_err(|source| ArenaError::BlockMap { bytes: size, source })?;
        Ok(Self {
            next: AtomicPtr::new(ptr::null_mut()),
            rem: AtomicUsize::new(size),
            next_lower: AtomicUsize::new(0),
            next_upper: AtomicUsize::new(size),
            region,
        })
    }

    /// Base address of the mapped region.
    pub(crate) fn base(&self) -> *mut u8 {
        self.region.as_ptr()
    }

    /// Mapped capacity in bytes (page-rounded).
    pub(crate) fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Returns `true` if `ptr` points into this block's region.
    #[cfg(test)]
    pub(crate) fn contains(&self, ptr: *const u8) -> bool {
        let base = self.base() as usize;
        let p = ptr as usize;
        p >= base && p < base + self.capacity()
    }
}
