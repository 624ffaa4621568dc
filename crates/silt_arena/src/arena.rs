//! The concurrent arena allocator.

use crate::block::Block;
use crate::error::ArenaResult;
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

/// Capacity of a standard arena block.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Requests above this size get a dedicated block.
pub const LARGE_THRESHOLD: usize = BLOCK_SIZE / 4;

/// A lock-free bump allocator over mapped blocks.
///
/// One arena serves one logical owner (a write buffer); all of the owner's
/// in-memory records are carved out of it and released together when the
/// arena is dropped. Allocation never takes a lock: concurrent callers
/// reserve space from the head block with compare-and-swap and install
/// fresh blocks the same way.
///
/// # Concurrency
///
/// All methods take `&self` and may be called from any number of threads.
/// Returned pointers address disjoint ranges and stay valid until the
/// arena is dropped.
///
/// # Example
///
/// ```rust
/// use silt_arena::Arena;
///
/// let arena = Arena::new().unwrap();
/// let a = arena.allocate(13).unwrap();
/// let b = arena.allocate(13).unwrap();
/// assert_ne!(a, b);
/// ```
pub struct Arena {
    /// Alignment unit: `max(8, pointer size)`, a power of two.
    align: usize,
    page_size: usize,
    /// Best-effort running total; see [`Arena::memory_usage`].
    memory_usage: AtomicU64,
    /// Head of the standard-block list, most recently installed first.
    blocks: AtomicPtr<Block>,
    /// Head of the large-block list, one block per oversized request.
    large: AtomicPtr<Block>,
}

// Blocks are only ever appended and their contents handed out in disjoint
// ranges; list mutation goes through the CAS protocols below.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Creates an arena with one standard block already mapped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ArenaError::BlockMap`] if the initial block cannot
    /// be mapped.
    pub fn new() -> ArenaResult<Self> {
        let align = mem::size_of::<*const ()>().max(8);
        debug_assert!(align.is_power_of_two());
        let arena = Self {
            align,
            page_size: silt_region::page_size(),
            memory_usage: AtomicU64::new(0),
            blocks: AtomicPtr::new(ptr::null_mut()),
            large: AtomicPtr::new(ptr::null_mut()),
        };
        let first = Box::new(Block::map(BLOCK_SIZE, arena.page_size)?);
        arena.blocks.store(Box::into_raw(first), Ordering::Release);
        arena
            .memory_usage
            .fetch_add(mem::size_of::<Block>() as u64, Ordering::Relaxed);
        Ok(arena)
    }

    /// Allocates `bytes` bytes.
    ///
    /// The returned pointer is valid for the arena's entire lifetime and
    /// is never handed out again. Requests above [`LARGE_THRESHOLD`] are
    /// served from a dedicated block shared with no other allocation.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ArenaError::BlockMap`] if a new block is needed
    /// and mapping it fails.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is zero; that is a contract violation, not a
    /// runtime condition.
    pub fn allocate(&self, bytes: usize) -> ArenaResult<NonNull<u8>> {
        assert!(bytes > 0, "zero-size arena allocation");
        if bytes > LARGE_THRESHOLD {
            return self.allocate_large(bytes);
        }
        loop {
            let head = self.blocks.load(Ordering::Acquire);
            // Never null: the first block is installed at construction.
            let block = unsafe { &*head };
            let mut rem = block.rem.load(Ordering::Acquire);
            while rem >= bytes {
                match block.rem.compare_exchange(
                    rem,
                    rem - bytes,
                    Ordering::Acquire,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return Ok(self.finalize(block, bytes)),
                    // rem only ever decreases, so retrying with the
                    // witnessed value terminates.
                    Err(witness) => rem = witness,
                }
            }
            // Head block exhausted for this request; try to install a
            // fresh one. The loser of the race releases its block rather
            // than linking it unused.
            let fresh = Box::into_raw(Box::new(Block::map(BLOCK_SIZE, self.page_size)?));
            unsafe { (*fresh).next.store(head, Ordering::Release) };
            if self
                .blocks
                .compare_exchange(head, fresh, Ordering::SeqCst, Ordering::Acquire)
                .is_ok()
            {
                self.memory_usage
                    .fetch_add(mem::size_of::<Block>() as u64, Ordering::Relaxed);
            } else {
                drop(unsafe { Box::from_raw(fresh) });
            }
        }
    }

    /// Allocates `bytes` bytes aligned to at least `max(8, pointer size)`.
    ///
    /// # Errors
    ///
    /// Same as [`Arena::allocate`].
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is zero.
    pub fn allocate_aligned(&self, bytes: usize) -> ArenaResult<NonNull<u8>> {
        assert!(bytes > 0, "zero-size arena allocation");
        let rounded = (bytes + (self.align - 1)) & !(self.align - 1);
        let result = self.allocate(rounded)?;
        debug_assert_eq!(result.as_ptr() as usize & (self.align - 1), 0);
        Ok(result)
    }

    /// Returns a best-effort snapshot of bytes allocated so far, including
    /// per-block overhead.
    ///
    /// Monotonically non-decreasing. May briefly undercount an allocation
    /// whose pointer has not yet been returned to its caller, so this is
    /// suitable for flush-trigger heuristics only, never for correctness.
    #[must_use]
    pub fn memory_usage(&self) -> u64 {
        self.memory_usage.load(Ordering::Relaxed)
    }

    /// Serves an oversized request from a dedicated, exact-size block.
    fn allocate_large(&self, bytes: usize) -> ArenaResult<NonNull<u8>> {
        let fresh = Box::into_raw(Box::new(Block::map(bytes, self.page_size)?));
        let mut head = self.large.load(Ordering::Acquire);
        loop {
            unsafe { (*fresh).next.store(head, Ordering::Release) };
            match self
                .large
                .compare_exchange(head, fresh, Ordering::SeqCst, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(witness) => head = witness,
            }
        }
        self.memory_usage
            .fetch_add(mem::size_of::<Block>() as u64, Ordering::Relaxed);
        Ok(self.finalize(unsafe { &*fresh }, bytes))
    }

    /// Turns a completed `rem` reservation into a concrete range.
    ///
    /// Alignment-sized requests come off the top cursor: the block's upper
    /// edge is page-aligned, so every multiple of the alignment unit
    /// subtracted from it stays aligned. Odd sizes come off the bottom.
    /// The cursors converge; they never cross, because `rem` was reserved
    /// first.
    fn finalize(&self, block: &Block, bytes: usize) -> NonNull<u8> {
        let aligned = (bytes + (self.align - 1)) & !(self.align - 1);
        let offset = if bytes == aligned {
            let mut upper = block.next_upper.load(Ordering::Relaxed);
            loop {
                match block.next_upper.compare_exchange(
                    upper,
                    upper - bytes,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break upper - bytes,
                    Err(witness) => upper = witness,
                }
            }
        } else {
            let mut lower = block.next_lower.load(Ordering::Relaxed);
            loop {
                match block.next_lower.compare_exchange(
                    lower,
                    lower + bytes,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break lower,
                    Err(witness) => lower = witness,
                }
            }
        };
        debug_assert!(
            block.next_lower.load(Ordering::Relaxed) <= block.next_upper.load(Ordering::Relaxed),
            "arena cursors crossed"
        );
        self.memory_usage.fetch_add(bytes as u64, Ordering::Relaxed);
        // Safety: offset lies inside the block's mapped region and the
        // reservation made the range exclusively ours.
        unsafe { NonNull::new_unchecked(block.base().add(offset)) }
    }

    /// Remaining reservable bytes in the current standard block.
    #[cfg(test)]
    fn head_block_rem(&self) -> usize {
        unsafe { &*self.blocks.load(Ordering::Acquire) }
            .rem
            .load(Ordering::Acquire)
    }

    /// Returns `true` if `ptr` points into memory owned by this arena.
    #[cfg(test)]
    fn owns(&self, ptr: *const u8) -> bool {
        for list in [&self.blocks, &self.large] {
            let mut cur = list.load(Ordering::Acquire);
            while !cur.is_null() {
                let block = unsafe { &*cur };
                if block.contains(ptr) {
                    return true;
                }
                cur = block.next.load(Ordering::Acquire);
            }
        }
        false
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        release_list(*self.blocks.get_mut());
        release_list(*self.large.get_mut());
    }
}

fn release_list(mut head: *mut Block) {
    while !head.is_null() {
        // Safety: every listed block came from Box::into_raw and is owned
        // solely by this arena.
        let block = unsafe { Box::from_raw(head) };
        head = block.next.load(Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("align", &self.align)
            .field("memory_usage", &self.memory_usage())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    fn ranges_disjoint(ranges: &mut [(usize, usize)]) -> bool {
        ranges.sort_unstable();
        ranges.windows(2).all(|w| w[0].0 + w[0].1 <= w[1].0)
    }

    #[test]
    fn allocations_are_disjoint_and_owned() {
        let arena = Arena::new().unwrap();
        let sizes = [1usize, 8, 13, 24, 100, 1000, 4096, 7, 512];
        let mut ranges = Vec::new();
        for &size in &sizes {
            let ptr = arena.allocate(size).unwrap();
            assert!(arena.owns(ptr.as_ptr()));
            ranges.push((ptr.as_ptr() as usize, size));
        }
        assert!(ranges_disjoint(&mut ranges));
    }

    #[test]
    #[should_panic(expected = "zero-size arena allocation")]
    fn zero_size_is_a_contract_violation() {
        let arena = Arena::new().unwrap();
        let _ = arena.allocate(0);
    }

    #[test]
    fn odd_sizes_bump_the_lower_cursor() {
        let arena = Arena::new().unwrap();
        let a = arena.allocate(3).unwrap();
        let b = arena.allocate(5).unwrap();
        // Low-end allocations are contiguous and grow upward.
        assert_eq!(b.as_ptr() as usize, a.as_ptr() as usize + 3);
    }

    #[test]
    fn aligned_sizes_bump_the_upper_cursor() {
        let arena = Arena::new().unwrap();
        let a = arena.allocate(16).unwrap();
        let b = arena.allocate(32).unwrap();
        // High-end allocations grow downward.
        assert_eq!(b.as_ptr() as usize + 32, a.as_ptr() as usize);
        let odd = arena.allocate(3).unwrap();
        assert!((odd.as_ptr() as usize) < b.as_ptr() as usize);
    }

    #[test]
    fn large_request_gets_a_dedicated_block() {
        let arena = Arena::new().unwrap();
        let rem_before = arena.head_block_rem();
        let ptr = arena.allocate(LARGE_THRESHOLD + 1).unwrap();
        assert!(arena.owns(ptr.as_ptr()));
        // The standard block is untouched by an oversized request.
        assert_eq!(arena.head_block_rem(), rem_before);
    }

    #[test]
    fn threshold_request_stays_in_the_standard_block() {
        let arena = Arena::new().unwrap();
        let rem_before = arena.head_block_rem();
        arena.allocate(LARGE_THRESHOLD).unwrap();
        assert_eq!(arena.head_block_rem(), rem_before - LARGE_THRESHOLD);
    }

    #[test]
    fn allocate_aligned_meets_the_alignment_unit() {
        let arena = Arena::new().unwrap();
        let align = mem::size_of::<*const ()>().max(8);
        for size in [1usize, 3, 8, 15, 100, 1023] {
            let ptr = arena.allocate_aligned(size).unwrap();
            assert_eq!(ptr.as_ptr() as usize % align, 0);
        }
    }

    #[test]
    fn memory_usage_is_monotone_and_covers_allocations() {
        let arena = Arena::new().unwrap();
        let mut previous = arena.memory_usage();
        let mut total = 0u64;
        for size in [5usize, 64, 700, 8000, LARGE_THRESHOLD + 100] {
            arena.allocate(size).unwrap();
            total += size as u64;
            let usage = arena.memory_usage();
            assert!(usage >= previous);
            previous = usage;
        }
        assert!(arena.memory_usage() >= total);
    }

    #[test]
    fn exhausted_block_rolls_over_to_a_fresh_one() {
        let arena = Arena::new().unwrap();
        let mut ranges = Vec::new();
        // Far more than one block's worth of 4 KiB allocations.
        for _ in 0..64 {
            let ptr = arena.allocate(4096).unwrap();
            assert!(arena.owns(ptr.as_ptr()));
            ranges.push((ptr.as_ptr() as usize, 4096));
        }
        assert!(ranges_disjoint(&mut ranges));
    }

    #[test]
    fn allocations_are_writable_for_the_arena_lifetime() {
        let arena = Arena::new().unwrap();
        let mut ptrs = Vec::new();
        for i in 0..32u8 {
            let ptr = arena.allocate(64).unwrap();
            unsafe { ptr.as_ptr().write_bytes(i, 64) };
            ptrs.push((ptr, i));
        }
        for (ptr, fill) in ptrs {
            let slice = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 64) };
            assert!(slice.iter().all(|&b| b == fill));
        }
    }

    #[test]
    fn two_concurrent_allocations_share_the_initial_block() {
        let arena = Arc::new(Arena::new().unwrap());
        let usage_before = arena.memory_usage();
        let mut handles = Vec::new();
        for _ in 0..2 {
            let arena = Arc::clone(&arena);
            handles.push(thread::spawn(move || {
                arena.allocate(8).unwrap().as_ptr() as usize
            }));
        }
        let addrs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_ne!(addrs[0], addrs[1]);
        assert_eq!(arena.memory_usage(), usage_before + 16);
    }

    #[test]
    fn concurrent_allocations_stay_disjoint() {
        let arena = Arc::new(Arena::new().unwrap());
        let mut handles = Vec::new();
        for t in 0..4usize {
            let arena = Arc::clone(&arena);
            handles.push(thread::spawn(move || {
                let mut ranges = Vec::new();
                for i in 0..500usize {
                    // A mix of odd, aligned, and occasionally large sizes.
                    let size = match (t + i) % 5 {
                        0 => 7,
                        1 => 16,
                        2 => 129,
                        3 => 1024,
                        _ => LARGE_THRESHOLD + 3,
                    };
                    let ptr = arena.allocate(size).unwrap();
                    // Touch the memory so overlapping ranges would clobber.
                    unsafe { ptr.as_ptr().write_bytes(t as u8, size) };
                    ranges.push((ptr.as_ptr() as usize, size));
                }
                ranges
            }));
        }
        let mut all: Vec<(usize, usize)> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(all.len(), 2000);
        assert!(ranges_disjoint(&mut all));
    }

    proptest! {
        #[test]
        fn random_size_sequences_never_overlap(
            sizes in prop::collection::vec(1usize..2048, 1..64)
        ) {
            let arena = Arena::new().unwrap();
            let mut ranges = Vec::new();
            for &size in &sizes {
                let ptr = arena.allocate(size).unwrap();
                prop_assert!(arena.owns(ptr.as_ptr()));
                ranges.push((ptr.as_ptr() as usize, size));
            }
            prop_assert!(ranges_disjoint(&mut ranges));
            prop_assert!(arena.memory_usage() >= sizes.iter().sum::<usize>() as u64);
        }
    }
}
