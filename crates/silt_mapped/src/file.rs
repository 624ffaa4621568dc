//! The growable segmented mapped file.

use crate::error::{FileError, FileResult};
use crate::segment::Segment;
use parking_lot::{Condvar, Mutex};
use silt_region::page_size;
use std::fs::{File, OpenOptions};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Segment spans are the host page size rounded up to this floor.
const SEGMENT_SPAN_FLOOR: usize = 256 * 1024;

/// Mutable file state, all under one lock.
struct State {
    /// `None` once the file is closed.
    file: Option<Arc<File>>,
    /// Highest byte ever written; the file is trimmed to this on close.
    end_offset: u64,
    /// Segment directory indexed by block number. An entry is `Some` once
    /// that window has been mapped.
    segments: Vec<Option<Arc<Segment>>>,
    /// A thread is truncating the file and extending the directory.
    grow_in_progress: bool,
    /// Threads parked waiting for that growth to finish.
    grow_waiters: u64,
}

/// A durable, randomly writable, growable byte sequence backed by memory
/// mapping.
///
/// The file is covered by fixed-size mapped segments created lazily:
/// writing past the current coverage truncates the file larger (with
/// headroom) and maps the new window. Data lives in the mapped views until
/// [`MappedFile::sync`] pushes it to disk; [`MappedFile::close`] trims the
/// growth headroom back to the written length.
///
/// # Concurrency
///
/// [`MappedFile::write_at`] is safe for concurrent callers writing
/// non-overlapping ranges; overlapping concurrent writes have no ordering
/// guarantee. [`MappedFile::append`] callers must serialize themselves -
/// the offset read and the write are not one atomic step.
///
/// # Example
///
/// ```no_run
/// use silt_mapped::MappedFile;
/// use std::path::Path;
///
/// let file = MappedFile::create(Path::new("table.tmp")).unwrap();
/// file.append(b"block data").unwrap();
/// file.write_at(4, b"patch").unwrap();
/// file.sync().unwrap();
/// file.close().unwrap();
/// ```
pub struct MappedFile {
    path: PathBuf,
    /// Size of one mapped window; a multiple of the page size.
    segment_span: usize,
    state: Mutex<State>,
    grow_done: Condvar,
}

impl MappedFile {
    /// Creates (or truncates) `path` and opens it for mapped writing.
    ///
    /// The segment span is the host page size rounded up to a multiple of
    /// 256 KiB.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Open`] if the file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> FileResult<Self> {
        let page = page_size();
        let span = SEGMENT_SPAN_FLOOR.div_ceil(page) * page;
        Self::with_segment_span(path, span)
    }

    /// Creates a mapped file with an explicit segment span.
    ///
    /// Smaller spans exercise growth more often; the span must be a
    /// non-zero multiple of the host page size.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Open`] if the file cannot be created.
    ///
    /// # Panics
    ///
    /// Panics if `span` is zero or not page-aligned.
    pub fn with_segment_span(path: impl AsRef<Path>, span: usize) -> FileResult<Self> {
        assert!(
            span > 0 && span % page_size() == 0,
            "segment span must be a non-zero multiple of the page size"
        );
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| FileError::Open {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            segment_span: span,
            state: Mutex::new(State {
                file: Some(Arc::new(file)),
                end_offset: 0,
                segments: Vec::new(),
                grow_in_progress: false,
                grow_waiters: 0,
            }),
            grow_done: Condvar::new(),
        })
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the segment span in bytes.
    #[must_use]
    pub fn segment_span(&self) -> usize {
        self.segment_span
    }

    /// Returns the written length: the highest byte any completed write
    /// has reached.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.state.lock().end_offset
    }

    /// Returns `true` if nothing has been written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `data` into the file image starting at `offset`, spanning as
    /// many segments as needed.
    ///
    /// The length bookkeeping commits under the lock *before* the copy, so
    /// a racing [`MappedFile::close`] truncates to cover this write; the
    /// copy itself runs without the lock. Concurrent callers writing
    /// overlapping ranges get no ordering guarantee - only disjoint ranges
    /// (or externally serialized writers) are correct.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Closed`] after close, or the growth/mapping
    /// error if new coverage is needed and cannot be created.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> FileResult<()> {
        let end = offset + data.len() as u64;
        {
            let mut state = self.state.lock();
            if state.file.is_none() {
                return Err(FileError::closed(&self.path));
            }
            if end > state.end_offset {
                state.end_offset = end;
            }
        }
        let span = self.segment_span as u64;
        let mut offset = offset;
        let mut data = data;
        while !data.is_empty() {
            let block = offset / span;
            let segment = self.segment(block)?;
            let local = (offset - block * span) as usize;
            let n = (self.segment_span - local).min(data.len());
            segment.write(local, &data[..n]);
            data = &data[n..];
            offset += n as u64;
        }
        Ok(())
    }

    /// Appends `data` at the current written end.
    ///
    /// Reads the end offset and delegates to [`MappedFile::write_at`];
    /// the two steps are **not** atomic. Concurrent appenders must hold
    /// their own lock (the WAL writer does), or their records will
    /// interleave and corrupt each other.
    ///
    /// # Errors
    ///
    /// Same as [`MappedFile::write_at`].
    pub fn append(&self, data: &[u8]) -> FileResult<()> {
        let offset = self.state.lock().end_offset;
        self.write_at(offset, data)
    }

    /// Reads `len` bytes starting at `offset` back through the mapped
    /// segments.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::ReadPastEnd`] if the range extends beyond the
    /// written length, or [`FileError::Closed`] after close.
    pub fn read_at(&self, offset: u64, len: usize) -> FileResult<Vec<u8>> {
        {
            let state = self.state.lock();
            if state.file.is_none() {
                return Err(FileError::closed(&self.path));
            }
            let size = state.end_offset;
            let end = offset.saturating_add(len as u64);
            if offset > size || end > size {
                return Err(FileError::ReadPastEnd {
                    path: self.path.clone(),
                    offset,
                    len,
                    size,
                });
            }
        }
        if len == 0 {
            return Ok(Vec::new());
        }
        let span = self.segment_span as u64;
        let mut buf = vec![0u8; len];
        let mut offset = offset;
        let mut filled = 0usize;
        while filled < len {
            let block = offset / span;
            let segment = self.segment(block)?;
            let local = (offset - block * span) as usize;
            let n = (self.segment_span - local).min(len - filled);
            segment.read(local, &mut buf[filled..filled + n]);
            filled += n;
            offset += n as u64;
        }
        Ok(buf)
    }

    /// Flushes buffered writes.
    ///
    /// A no-op: data is already resident in the mapped views. Only
    /// [`MappedFile::sync`] provides durability.
    #[allow(clippy::unused_self)]
    pub fn flush(&self) -> FileResult<()> {
        Ok(())
    }

    /// Pushes every mapped segment's dirty pages and the handle's OS
    /// buffers to disk.
    ///
    /// Fail-soft: every mapped segment is attempted even after an earlier
    /// failure; the first error encountered is the one returned.
    ///
    /// # Errors
    ///
    /// Returns the first [`FileError::SegmentFlush`] or
    /// [`FileError::HandleFlush`], or [`FileError::Closed`] after close.
    pub fn sync(&self) -> FileResult<()> {
        let (file, segments) = {
            let state = self.state.lock();
            let Some(file) = &state.file else {
                return Err(FileError::closed(&self.path));
            };
            let segments: Vec<(u64, Arc<Segment>)> = state
                .segments
                .iter()
                .enumerate()
                .filter_map(|(block, slot)| {
                    slot.as_ref().map(|s| (block as u64, Arc::clone(s)))
                })
                .collect();
            (Arc::clone(file), segments)
        };
        let mut result = Ok(());
        for (block, segment) in segments {
            if let Err(source) = segment.flush() {
                warn!(block, %source, "segment flush failed");
                if result.is_ok() {
                    result = Err(FileError::SegmentFlush {
                        path: self.path.clone(),
                        block,
                        source,
                    });
                }
            }
        }
        if let Err(source) = file.sync_all() {
            if result.is_ok() {
                result = Err(FileError::HandleFlush {
                    path: self.path.clone(),
                    source,
                });
            }
        }
        result
    }

    /// Closes the file: unmaps every segment, trims the file to the
    /// written length (discarding growth headroom), and releases the
    /// descriptor.
    ///
    /// The mutable state is snapshotted and cleared in one locked step, so
    /// an operation racing this call observes either a fully valid or a
    /// fully closed file, never a torn one. Cleanup is fail-soft; the
    /// first error is returned. Idempotent: closing twice is `Ok`.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Truncate`] if the final trim fails.
    pub fn close(&self) -> FileResult<()> {
        let (file, end_offset, segments) = {
            let mut state = self.state.lock();
            // An in-flight growth would re-extend the file after our trim;
            // growth is rare and bounded by one truncate, so wait it out.
            while state.grow_in_progress {
                self.grow_done.wait(&mut state);
            }
            let Some(file) = state.file.take() else {
                return Ok(());
            };
            let end_offset = mem::take(&mut state.end_offset);
            let segments = mem::take(&mut state.segments);
            (file, end_offset, segments)
        };
        // Unmapping happens as the directory drops; a writer that cloned
        // a segment handle before the snapshot keeps its mapping alive
        // until its copy finishes.
        drop(segments);
        let mut result = Ok(());
        if let Err(source) = file.set_len(end_offset) {
            result = Err(FileError::Truncate {
                path: self.path.clone(),
                len: end_offset,
                source,
            });
        }
        // Dropping the last handle closes the descriptor.
        drop(file);
        debug!(path = %self.path.display(), end_offset, "closed mapped file");
        result
    }

    /// Returns the segment covering `block`, mapping it (and growing the
    /// file) if needed.
    ///
    /// Fast path: the segment is already mapped and is returned without
    /// blocking. Slow path: the file is grown to cover `block`, then the
    /// mapping is created outside the lock; if two threads race to map the
    /// same block, whichever commits first wins and the loser's duplicate
    /// mapping is released - at most one live mapping per block.
    fn segment(&self, block: u64) -> FileResult<Arc<Segment>> {
        let covered = {
            let state = self.state.lock();
            if state.file.is_none() {
                return Err(FileError::closed(&self.path));
            }
            if let Some(Some(segment)) = state.segments.get(block as usize) {
                return Ok(Arc::clone(segment));
            }
            (state.segments.len() as u64) > block
        };
        if !covered {
            self.grow(block)?;
        }
        let file = {
            let state = self.state.lock();
            match &state.file {
                None => return Err(FileError::closed(&self.path)),
                Some(file) => Arc::clone(file),
            }
        };
        let fresh = Segment::map(&file, block, self.segment_span, &self.path)?;
        let mut state = self.state.lock();
        if state.file.is_none() {
            // Closed while we were mapping; `fresh` unmaps on drop.
            return Err(FileError::closed(&self.path));
        }
        debug_assert!((block as usize) < state.segments.len());
        let slot = &mut state.segments[block as usize];
        if let Some(existing) = slot {
            let existing = Arc::clone(existing);
            drop(state);
            // `fresh` lost the race and unmaps here.
            debug!(block, "released duplicate segment mapping");
            Ok(existing)
        } else {
            let segment = Arc::new(fresh);
            *slot = Some(Arc::clone(&segment));
            Ok(segment)
        }
    }

    /// Grows the file and the segment directory to cover `block`.
    ///
    /// If another thread is already growing, parks until it finishes and
    /// re-checks. Otherwise this thread becomes the sole grower: the
    /// truncate (blocking I/O) runs without the lock so writers into
    /// already-covered segments never stall behind it; the directory is
    /// extended, the flag cleared, and all waiters woken under the lock.
    /// The directory is extended only when the truncate succeeded, so
    /// coverage never claims space the file does not have.
    fn grow(&self, block: u64) -> FileResult<()> {
        let file = {
            let mut state = self.state.lock();
            while state.grow_in_progress && (state.segments.len() as u64) <= block {
                state.grow_waiters += 1;
                self.grow_done.wait(&mut state);
                state.grow_waiters -= 1;
            }
            if (state.segments.len() as u64) > block {
                return Ok(());
            }
            let file = match &state.file {
                None => return Err(FileError::closed(&self.path)),
                Some(file) => Arc::clone(file),
            };
            state.grow_in_progress = true;
            file
        };
        // Truncate with headroom: cover `block` rounded up to the next
        // eight segments, plus one.
        let new_len = ((block + 7) & !7) + 1;
        let new_bytes = new_len * self.segment_span as u64;
        let truncated = file.set_len(new_bytes);
        let mut state = self.state.lock();
        state.grow_in_progress = false;
        let result = match truncated {
            Ok(()) => {
                if state.segments.len() < new_len as usize {
                    state.segments.resize(new_len as usize, None);
                }
                debug!(
                    path = %self.path.display(),
                    segments = new_len,
                    "grew segment directory"
                );
                Ok(())
            }
            Err(source) => Err(FileError::Truncate {
                path: self.path.clone(),
                len: new_bytes,
                source,
            }),
        };
        self.grow_done.notify_all();
        result
    }

    /// Number of segments currently mapped.
    #[cfg(test)]
    fn mapped_segment_count(&self) -> usize {
        self.state
            .lock()
            .segments
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }

    /// Current segment-directory length (file coverage in segments).
    #[cfg(test)]
    fn directory_len(&self) -> usize {
        self.state.lock().segments.len()
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            warn!(%error, "close on drop failed");
        }
    }
}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedFile")
            .field("path", &self.path)
            .field("segment_span", &self.segment_span)
            .finish_non_exhaustive()
    }
}
