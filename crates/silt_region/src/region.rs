//! One mapped memory region, anonymous or file-backed.

use crate::error::{RegionError, RegionResult};
use memmap2::{MmapMut, MmapOptions};
use std::fs::File;
use std::ptr;
use std::sync::OnceLock;

/// A contiguous read-write mapping.
///
/// Anonymous regions back arena blocks; file-backed regions back the
/// segments of a mapped file. The mapping is released when the region is
/// dropped.
///
/// # Concurrency
///
/// The base pointer returned by [`Region::as_ptr`] is captured when the
/// mapping is created and remains valid until drop. Multiple threads may
/// write through it concurrently via [`Region::write`] as long as they
/// keep their ranges disjoint; the region itself does no coordination.
#[derive(Debug)]
pub struct Region {
    map: MmapMut,
    ptr: *mut u8,
}

// The mapping is plain bytes with no interior state; all coordination of
// concurrent access is the caller's responsibility.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Maps `len` bytes of zero-filled anonymous memory.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::MapAnonymous`] if the OS refuses the mapping.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero.
    pub fn map_anonymous(len: usize) -> RegionResult<Self> {
        assert!(len > 0, "cannot map an empty region");
        let mut map = MmapOptions::new()
            .len(len)
            .map_anon()
            .map_err(|source| RegionError::MapAnonymous { len, source })?;
        let ptr = map.as_mut_ptr();
        Ok(Self { map, ptr })
    }

    /// Maps `len` bytes of `file` starting at `offset` as a shared
    /// read-write window.
    ///
    /// Writes through the region land in the page cache and reach the file
    /// on [`Region::flush`] or OS writeback. `offset` must be page-aligned
    /// and the file must already span `offset + len`.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::MapFile`] if the OS refuses the mapping.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero.
    pub fn map_file(file: &File, offset: u64, len: usize) -> RegionResult<Self> {
        assert!(len > 0, "cannot map an empty region");
        // Safety: the mapping is shared and the file outlives nothing here;
        // callers must not truncate the file below `offset + len` while the
        // region is live.
        let mut map = unsafe {
            MmapOptions::new()
                .offset(offset)
                .len(len)
                .map_mut(file)
                .map_err(|source| RegionError::MapFile { offset, len, source })?
        };
        let ptr = map.as_mut_ptr();
        Ok(Self { map, ptr })
    }

    /// Returns the base pointer of the mapping.
    ///
    /// Valid for the region's entire lifetime.
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Returns the length of the mapping in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the mapping is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Copies `data` into the region at `offset`.
    ///
    /// # Safety
    ///
    /// No other thread may concurrently read or write an overlapping range.
    ///
    /// # Panics
    ///
    /// Panics if the copy would run past the end of the region.
    pub unsafe fn write(&self, offset: usize, data: &[u8]) {
        assert!(
            offset.checked_add(data.len()).is_some_and(|end| end <= self.len()),
            "write of {} bytes at {} overruns region of {} bytes",
            data.len(),
            offset,
            self.len()
        );
        ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(offset), data.len());
    }

    /// Copies bytes from the region at `offset` into `buf`.
    ///
    /// # Safety
    ///
    /// No other thread may concurrently write an overlapping range.
    ///
    /// # Panics
    ///
    /// Panics if the copy would run past the end of the region.
    pub unsafe fn read(&self, offset: usize, buf: &mut [u8]) {
        assert!(
            offset.checked_add(buf.len()).is_some_and(|end| end <= self.len()),
            "read of {} bytes at {} overruns region of {} bytes",
            buf.len(),
            offset,
            self.len()
        );
        ptr::copy_nonoverlapping(self.ptr.add(offset), buf.as_mut_ptr(), buf.len());
    }

    /// Synchronously writes the region's dirty pages back to its file.
    ///
    /// A no-op for anonymous regions.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::Flush`] if writeback fails.
    pub fn flush(&self) -> RegionResult<()> {
        self.map
            .flush()
            .map_err(|source| RegionError::Flush { source })
    }
}

/// Returns the host page size in bytes.
///
/// Queried once and cached. Falls back to 4 KiB on platforms where the
/// query is unavailable.
#[must_use]
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        #[cfg(unix)]
        {
            // Safety: sysconf with a valid name has no preconditions.
            let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            if sz > 0 {
                return sz as usize;
            }
        }
        4096
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::tempdir;

    #[test]
    fn anonymous_region_is_zeroed() {
        let region = Region::map_anonymous(4096).unwrap();
        let mut buf = [0xFFu8; 16];
        unsafe { region.read(100, &mut buf) };
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn anonymous_write_then_read() {
        let region = Region::map_anonymous(4096).unwrap();
        unsafe { region.write(128, b"silt") };
        let mut buf = [0u8; 4];
        unsafe { region.read(128, &mut buf) };
        assert_eq!(&buf, b"silt");
    }

    #[test]
    #[should_panic(expected = "overruns region")]
    fn write_past_end_panics() {
        let region = Region::map_anonymous(64).unwrap();
        unsafe { region.write(60, b"too long") };
    }

    #[test]
    #[should_panic(expected = "empty region")]
    fn empty_mapping_panics() {
        let _ = Region::map_anonymous(0);
    }

    #[test]
    fn file_region_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region.bin");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        file.set_len(8192).unwrap();

        let region = Region::map_file(&file, 0, 8192).unwrap();
        unsafe { region.write(4000, b"durable") };
        region.flush().unwrap();
        drop(region);

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(&contents[4000..4007], b"durable");
    }

    #[test]
    fn file_region_at_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region.bin");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        let page = page_size() as u64;
        file.set_len(page * 2).unwrap();

        let region = Region::map_file(&file, page, page as usize).unwrap();
        unsafe { region.write(0, b"second page") };
        region.flush().unwrap();

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(&contents[page as usize..page as usize + 11], b"second page");
    }

    #[test]
    fn page_size_is_sane() {
        let sz = page_size();
        assert!(sz >= 512);
        assert!(sz.is_power_of_two());
    }
}
