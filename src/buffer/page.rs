use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

/// A fixed-size page buffer cached in memory.
///
/// The pin count keeps the page out of eviction while any caller holds a
/// reference; the reader/writer lock protects the byte buffer; the dirty
/// flag records whether the buffer diverges from the on-disk copy.
pub struct Page {
    /// Identity, set by the pager when the page is read in
    id: PageId,
    /// Number of live references; the page must not be evicted while > 0
    pin_count: AtomicU32,
    /// True if the buffer was modified and not yet written back
    dirty: AtomicBool,
    /// The page bytes, guarded by a reader/writer lock
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
}

impl Page {
    pub(crate) fn new(id: PageId) -> Self {
        Self {
            id,
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops one pin. Unpinning a page that is not pinned is a programmer
    /// error and aborts.
    pub fn unpin(&self) {
        let prev = self
            .pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            });
        if prev.is_err() {
            panic!("unpin() called on page {} that is not pinned", self.id);
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) != 0
    }

    #[cfg(test)]
    pub(crate) fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Acquires a shared lock on the page bytes.
    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    /// Acquires an exclusive lock on the page bytes. Callers that modify
    /// the buffer must also call `mark_dirty`.
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn mark_clean(&self) {
        self.dirty.store(false, Ordering::Release);
    }
}

/// RAII pin on a cached page, handed out by `Pager::fetch_page`.
///
/// Holding a `PageRef` keeps the page in the cache; cloning takes an
/// additional pin, dropping releases one. Node views and cursors own one
/// per page they look at, so everything on the call stack stays resident.
pub struct PageRef {
    page: Arc<Page>,
}

impl PageRef {
    /// Wraps a page that has already been pinned once on our behalf.
    pub(crate) fn from_pinned(page: Arc<Page>) -> Self {
        Self { page }
    }
}

impl Deref for PageRef {
    type Target = Page;

    fn deref(&self) -> &Page {
        &self.page
    }
}

impl Clone for PageRef {
    fn clone(&self) -> Self {
        self.page.pin();
        Self {
            page: Arc::clone(&self.page),
        }
    }
}

impl Drop for PageRef {
    fn drop(&mut self) {
        self.page.unpin();
    }
}
