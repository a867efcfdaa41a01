use crate::common::{
    PageId, Result, StratumError, INDEX_HEADER_SIZE, INDEX_MAX_ENTRIES_PER_PAGE, INVALID_PAGE_ID,
    PAGE_SIZE,
};

use super::Storage;

/// Persistent bitmap of live page ids, stored as page 0 of the file.
///
/// Layout: a u32 LE entry count (the high-water mark) followed by one bit
/// per ever-allocated page. Bit `i` records page id `i + 1`; id 0 is this
/// page itself and is never handed out. Entries are only appended, never
/// reclaimed.
///
/// The pager wraps the index in a `RwLock`: `allocate` runs under the
/// writer lock, lookups under the reader lock.
pub struct AllocationIndex {
    n_entries: u32,
    dirty: bool,
    buf: Box<[u8; PAGE_SIZE]>,
}

impl AllocationIndex {
    /// Reads the index from page 0 of `storage`.
    pub fn read(storage: &dyn Storage) -> Result<Self> {
        let mut buf = Box::new([0u8; PAGE_SIZE]);
        storage.read_at(&mut buf[..], 0)?;

        let n_entries = u32::from_le_bytes(buf[..INDEX_HEADER_SIZE].try_into().unwrap());
        Ok(Self {
            n_entries,
            dirty: false,
            buf,
        })
    }

    /// Number of page ids ever allocated (the high-water mark).
    pub fn n_entries(&self) -> u32 {
        self.n_entries
    }

    /// Hands out the next page id and marks it live.
    pub fn allocate(&mut self) -> Result<PageId> {
        let idx = self.n_entries;
        if idx >= INDEX_MAX_ENTRIES_PER_PAGE {
            return Err(StratumError::NoFreePages);
        }

        let byte = (idx / 8) as usize;
        let bit = idx % 8;
        self.buf[INDEX_HEADER_SIZE + byte] |= 1 << bit;
        self.n_entries += 1;
        self.buf[..INDEX_HEADER_SIZE].copy_from_slice(&self.n_entries.to_le_bytes());
        self.dirty = true;

        Ok(PageId::new(idx + 1))
    }

    pub fn is_allocated(&self, id: PageId) -> bool {
        let raw = id.as_u32();
        if raw == 0 || raw > self.n_entries {
            return false;
        }

        let idx = raw - 1;
        let byte = (idx / 8) as usize;
        let bit = idx % 8;
        self.buf[INDEX_HEADER_SIZE + byte] & (1 << bit) != 0
    }

    /// File offset of a live page.
    pub fn offset_of(&self, id: PageId) -> Result<u64> {
        if !self.is_allocated(id) {
            return Err(StratumError::PageNotAllocated(id));
        }
        Ok(id.as_u32() as u64 * PAGE_SIZE as u64)
    }

    /// Next live page id strictly after `id`, or the invalid id at the
    /// end of the bitmap.
    pub fn next_allocated(&self, id: PageId) -> PageId {
        let mut next = id.as_u32().saturating_add(1);
        while next <= self.n_entries {
            let candidate = PageId::new(next);
            if self.is_allocated(candidate) {
                return candidate;
            }
            next += 1;
        }
        INVALID_PAGE_ID
    }

    /// Writes the header and bitmap back to page 0 if anything changed.
    pub fn sync_pages(&mut self, storage: &dyn Storage) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        storage.write_at(&self.buf[..], 0)?;
        self.dirty = false;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}
