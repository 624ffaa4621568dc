//! # Silt Arena
//!
//! Lock-free arena allocator for siltdb write buffers.
//!
//! Every in-memory record, index node, and key/value string in a write
//! buffer is carved out of an [`Arena`]: a bump allocator serving
//! variable-size allocations from large mapped blocks, freed only in bulk
//! when the arena itself is dropped. The allocation path runs on every
//! single record insertion, so it uses nothing but atomic loads, stores,
//! and compare-and-swap - no locks, ever.
//!
//! ## Design Principles
//!
//! - Allocations are never individually freed; pointers stay valid for the
//!   arena's whole lifetime
//! - Requests above a quarter of the standard block size get a dedicated
//!   block, so one oversized record cannot starve the shared block
//! - Each block bumps from both ends at once: alignment-sized requests
//!   come off the top (the block edge is alignment-guaranteed), odd-sized
//!   requests off the bottom, and the two cursors simply converge
//! - A failed block mapping is a reported [`ArenaError`], never a bad
//!   pointer
//!
//! ## Example
//!
//! ```rust
//! use silt_arena::Arena;
//!
//! let arena = Arena::new().unwrap();
//! let ptr = arena.allocate(24).unwrap();
//! unsafe { ptr.as_ptr().write_bytes(0xAB, 24) };
//! assert!(arena.memory_usage() >= 24);
//! ```

#![warn(missing_docs)]

mod arena;
mod block;
mod error;

pub use arena::{Arena, BLOCK_SIZE, LARGE_THRESHOLD};
pub use error::{ArenaError, ArenaResult};
