use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::buffer::{LruCache, Page, PageRef};
use crate::common::{PageId, Result, StratumError, PAGE_LOCK_SHARDS, PAGE_SIZE};

use super::{AllocationIndex, Storage};

#[derive(Default)]
struct PagerCounters {
    disk_reads: AtomicU64,
    disk_writes: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

/// Snapshot of the pager's I/O counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PagerStats {
    pub disk_reads: u64,
    pub disk_writes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Manages the pool of in-memory pages, abstracting away the file layout.
///
/// Fetches go through the LRU cache; misses read from storage and may
/// evict (and flush) a victim. New ids come from the allocation index on
/// page 0, growing the file as needed. Per-id critical sections are
/// serialized by a bank of `PAGE_LOCK_SHARDS` mutexes selected by an FNV
/// hash of the id; a shard lock is only ever held across the cache-miss
/// window, never across caller code.
pub struct Pager {
    storage: Box<dyn Storage>,
    storage_size: Mutex<u64>,
    cache: LruCache,
    index: RwLock<AllocationIndex>,
    shard_locks: Box<[Mutex<()>]>,
    counters: PagerCounters,
}

impl Pager {
    /// Creates a pager over `storage`, caching at most `max_pages` pages.
    ///
    /// The storage size must be a multiple of the page size. An empty
    /// storage is grown to one page to hold the allocation index.
    pub fn new(max_pages: usize, storage: Box<dyn Storage>) -> Result<Self> {
        let size = storage.size()?;
        if size % PAGE_SIZE as u64 != 0 {
            return Err(StratumError::InvalidStorageSize(size));
        }

        let mut size = size;
        if size < PAGE_SIZE as u64 {
            storage.truncate(PAGE_SIZE as u64)?;
            size = PAGE_SIZE as u64;
        }

        let index = AllocationIndex::read(storage.as_ref())?;
        let shard_locks: Box<[Mutex<()>]> =
            (0..PAGE_LOCK_SHARDS).map(|_| Mutex::new(())).collect();

        Ok(Self {
            storage,
            storage_size: Mutex::new(size),
            cache: LruCache::new(max_pages),
            index: RwLock::new(index),
            shard_locks,
            counters: PagerCounters::default(),
        })
    }

    /// Obtains a page by id. The returned guard keeps the page pinned;
    /// dropping it releases the pin.
    pub fn fetch_page(&self, id: PageId) -> Result<PageRef> {
        let shard = self.shard(id);
        let guard = shard.lock();

        // First check the memory cache.
        if let Some(page) = self.cache.get(id) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            drop(guard);
            return Ok(PageRef::from_pinned(page));
        }
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);

        // Read from storage, pin, and install in the cache.
        let page = Arc::new(self.read_page(id)?);
        page.pin();
        let evicted = self.cache.put(id, Arc::clone(&page));
        drop(guard);

        let page = PageRef::from_pinned(page);
        if let Some((evicted_id, evicted_page)) = evicted {
            // The victim is unpinned, so its read lock cannot deadlock
            // against a holder waiting on this fetch.
            debug!(victim = %evicted_id, brought_in = %id, "evicting page");
            let data = evicted_page.data();
            self.sync_page(evicted_id, &evicted_page, &data[..])?;
        }

        Ok(page)
    }

    /// Allocates a new page id, growing the file to cover it.
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut index = self.index.write();
        let id = index.allocate()?;
        let offset = id.as_u32() as u64 * PAGE_SIZE as u64;
        self.ensure_size(offset + PAGE_SIZE as u64)?;
        trace!(page = %id, "allocated page");
        Ok(id)
    }

    /// Writes a dirty page's bytes back to storage and marks it clean.
    ///
    /// The caller must hold at least the page's read lock and pass the
    /// locked bytes; a clean page is a no-op.
    pub fn sync_page(&self, id: PageId, page: &Page, data: &[u8]) -> Result<()> {
        if !page.is_dirty() {
            return Ok(());
        }

        let _shard = self.shard(id).lock();
        let offset = self.index.read().offset_of(id)?;
        self.storage.write_at(data, offset)?;
        self.counters.disk_writes.fetch_add(1, Ordering::Relaxed);
        page.mark_clean();
        Ok(())
    }

    /// Flushes the allocation index to page 0 if it changed.
    pub fn sync_metadata(&self) -> Result<()> {
        let mut index = self.index.write();
        if !index.is_dirty() {
            return Ok(());
        }
        index.sync_pages(self.storage.as_ref())?;
        self.counters.disk_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Flushes the allocation index and every cached page.
    pub fn sync_all(&self) -> Result<()> {
        self.sync_metadata()?;

        // Snapshot under the cache mutex, flush outside it.
        let mut pages = Vec::new();
        self.cache.for_each(|id, page| {
            pages.push((id, Arc::clone(page)));
            true
        });

        for (id, page) in pages {
            let data = page.data();
            self.sync_page(id, &page, &data[..])?;
        }
        Ok(())
    }

    /// Id of the first live page, or the invalid id if none exist.
    pub fn first_page(&self) -> PageId {
        self.next_page(PageId::new(0))
    }

    /// Next live page id after `id`, or the invalid id at the end.
    pub fn next_page(&self, id: PageId) -> PageId {
        self.index.read().next_allocated(id)
    }

    pub fn stats(&self) -> PagerStats {
        PagerStats {
            disk_reads: self.counters.disk_reads.load(Ordering::Relaxed),
            disk_writes: self.counters.disk_writes.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
        }
    }

    fn shard(&self, id: PageId) -> &Mutex<()> {
        &self.shard_locks[id.shard_hash() as usize % self.shard_locks.len()]
    }

    fn ensure_size(&self, required: u64) -> Result<()> {
        let mut size = self.storage_size.lock();
        if *size >= required {
            return Ok(());
        }
        self.storage.truncate(required)?;
        *size = required;
        Ok(())
    }

    /// Reads a live page's bytes from storage.
    fn read_page(&self, id: PageId) -> Result<Page> {
        let offset = self.index.read().offset_of(id)?;
        trace!(page = %id, offset, "reading page from storage");

        let page = Page::new(id);
        {
            let mut data = page.data_mut();
            self.storage.read_at(&mut data[..], offset)?;
        }
        self.counters.disk_reads.fetch_add(1, Ordering::Relaxed);
        Ok(page)
    }

    #[cfg(test)]
    pub(crate) fn storage_len(&self) -> u64 {
        *self.storage_size.lock()
    }
}

impl Drop for Pager {
    fn drop(&mut self) {
        let _ = self.sync_all();
    }
}
