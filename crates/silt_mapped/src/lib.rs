//! # Silt Mapped
//!
//! Growable segmented memory-mapped files for siltdb.
//!
//! A [`MappedFile`] is a durable, randomly writable, growable byte
//! sequence: the file is covered by an array of fixed-size mapped
//! segments, created lazily as writes land in new territory. The
//! write-ahead log and table builders use it for sequential appends and
//! the occasional random patch-write (footer finalization).
//!
//! ## Design Principles
//!
//! - Writes are memory copies into mapped segments; only [`MappedFile::sync`]
//!   makes them durable
//! - Growth is rare and serialized: one thread truncates and extends the
//!   segment directory while late arrivals park on a condvar
//! - The hot write path holds the file lock only for the `end_offset`
//!   bookkeeping, never for the copy itself
//! - Every failure carries the file path and a cause; none of them
//!   terminate the process
//!
//! ## Example
//!
//! ```no_run
//! use silt_mapped::MappedFile;
//! use std::path::Path;
//!
//! let file = MappedFile::create(Path::new("wal.log")).unwrap();
//! file.append(b"record").unwrap();
//! file.sync().unwrap();   // durability point
//! file.close().unwrap();  // trims growth padding to the written length
//! ```

#![warn(missing_docs)]

mod error;
mod file;
mod segment;

pub use error::{FileError, FileResult};
pub use file::MappedFile;
