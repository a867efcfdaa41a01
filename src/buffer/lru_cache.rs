use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::PageId;

use super::Page;

struct Entry {
    id: PageId,
    page: Arc<Page>,
    /// Neighbor toward the least recently used end
    prev: Option<usize>,
    /// Neighbor toward the most recently used end
    next: Option<usize>,
}

struct LruInner {
    capacity: usize,
    map: HashMap<PageId, usize>,
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
    /// Most recently used entry
    mru: Option<usize>,
    /// Least recently used entry
    lru: Option<usize>,
}

/// Bounded page cache with LRU eviction that never evicts a pinned page.
///
/// A single mutex serializes every operation; even `get` reorders the
/// recency list, so there is nothing to gain from a reader/writer lock.
pub struct LruCache {
    inner: Mutex<LruInner>,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be positive");
        Self {
            inner: Mutex::new(LruInner {
                capacity,
                map: HashMap::new(),
                slots: Vec::new(),
                free: Vec::new(),
                mru: None,
                lru: None,
            }),
        }
    }

    /// Looks up a page, pins it once and marks it most recently used.
    pub fn get(&self, id: PageId) -> Option<Arc<Page>> {
        let mut inner = self.inner.lock();
        let slot = *inner.map.get(&id)?;
        inner.mark_used(slot);
        let page = Arc::clone(&inner.slots[slot].as_ref().unwrap().page);
        page.pin();
        Some(page)
    }

    /// Inserts a page, evicting the least recently used unpinned page
    /// when full. Returns the evicted (id, page) pair, or `None` when no
    /// eviction took place.
    ///
    /// Panics if every cached page is pinned, or if `id` is already
    /// present and its page is pinned; both are caller contract
    /// violations.
    pub fn put(&self, id: PageId, page: Arc<Page>) -> Option<(PageId, Arc<Page>)> {
        let mut inner = self.inner.lock();

        if let Some(&slot) = inner.map.get(&id) {
            // Entry already exists, reuse it. Generally this should never
            // happen: the pager serializes fetches of the same id.
            let entry = inner.slots[slot].as_mut().unwrap();
            if entry.page.is_pinned() {
                panic!("attempt to replace a pinned page ({id})");
            }
            let evicted = std::mem::replace(&mut entry.page, page);
            inner.mark_used(slot);
            return Some((id, evicted));
        }

        if inner.map.len() >= inner.capacity {
            // Walk from the least recently used end toward MRU until an
            // unpinned victim turns up.
            let mut cursor = inner.lru;
            while let Some(slot) = cursor {
                let entry = inner.slots[slot].as_ref().unwrap();
                if !entry.page.is_pinned() {
                    break;
                }
                cursor = entry.next;
            }
            let slot = match cursor {
                Some(slot) => slot,
                None => panic!("all cache pages are pinned"),
            };

            inner.detach(slot);
            let entry = inner.slots[slot].as_mut().unwrap();
            let evicted_id = entry.id;
            let evicted_page = std::mem::replace(&mut entry.page, page);
            entry.id = id;
            inner.map.remove(&evicted_id);
            inner.map.insert(id, slot);
            inner.push_mru(slot);
            return Some((evicted_id, evicted_page));
        }

        let slot = match inner.free.pop() {
            Some(slot) => slot,
            None => {
                inner.slots.push(None);
                inner.slots.len() - 1
            }
        };
        inner.slots[slot] = Some(Entry {
            id,
            page,
            prev: None,
            next: None,
        });
        inner.map.insert(id, slot);
        inner.push_mru(slot);
        None
    }

    /// Detaches a page from the cache, returning it if present.
    pub fn remove(&self, id: PageId) -> Option<Arc<Page>> {
        let mut inner = self.inner.lock();
        let slot = inner.map.remove(&id)?;
        inner.detach(slot);
        let entry = inner.slots[slot].take().unwrap();
        inner.free.push(slot);
        Some(entry.page)
    }

    /// Visits cached pages from most to least recently used; `f`
    /// returning false stops the iteration.
    pub fn for_each(&self, mut f: impl FnMut(PageId, &Arc<Page>) -> bool) {
        let inner = self.inner.lock();
        let mut cursor = inner.mru;
        while let Some(slot) = cursor {
            let entry = inner.slots[slot].as_ref().unwrap();
            if !f(entry.id, &entry.page) {
                break;
            }
            cursor = entry.prev;
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().map.len()
    }
}

impl LruInner {
    fn detach(&mut self, slot: usize) {
        let (prev, next) = {
            let entry = self.slots[slot].as_ref().unwrap();
            (entry.prev, entry.next)
        };

        if self.lru == Some(slot) {
            self.lru = next;
        }
        if self.mru == Some(slot) {
            self.mru = prev;
        }
        if let Some(next) = next {
            self.slots[next].as_mut().unwrap().prev = prev;
        }
        if let Some(prev) = prev {
            self.slots[prev].as_mut().unwrap().next = next;
        }

        let entry = self.slots[slot].as_mut().unwrap();
        entry.prev = None;
        entry.next = None;
    }

    fn push_mru(&mut self, slot: usize) {
        {
            let entry = self.slots[slot].as_mut().unwrap();
            entry.next = None;
            entry.prev = self.mru;
        }
        if let Some(mru) = self.mru {
            self.slots[mru].as_mut().unwrap().next = Some(slot);
        }
        self.mru = Some(slot);
        if self.lru.is_none() {
            self.lru = Some(slot);
        }
    }

    fn mark_used(&mut self, slot: usize) {
        if self.mru == Some(slot) {
            return;
        }
        self.detach(slot);
        self.push_mru(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PageId;

    fn page(id: u32) -> Arc<Page> {
        Arc::new(Page::new(PageId::new(id)))
    }

    #[test]
    fn test_get_miss() {
        let cache = LruCache::new(4);
        assert!(cache.get(PageId::new(1)).is_none());
    }

    #[test]
    fn test_put_get_pins() {
        let cache = LruCache::new(4);
        assert!(cache.put(PageId::new(1), page(1)).is_none());

        let got = cache.get(PageId::new(1)).unwrap();
        assert_eq!(got.id(), PageId::new(1));
        assert!(got.is_pinned());
        got.unpin();
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = LruCache::new(2);
        cache.put(PageId::new(1), page(1));
        cache.put(PageId::new(2), page(2));

        // Touch 1 so 2 becomes the eviction candidate.
        cache.get(PageId::new(1)).unwrap().unpin();

        let (evicted_id, _) = cache.put(PageId::new(3), page(3)).unwrap();
        assert_eq!(evicted_id, PageId::new(2));
        assert!(cache.get(PageId::new(1)).is_some());
        assert!(cache.get(PageId::new(3)).is_some());
        assert!(cache.get(PageId::new(2)).is_none());
    }

    #[test]
    fn test_eviction_skips_pinned() {
        let cache = LruCache::new(2);
        cache.put(PageId::new(1), page(1));
        cache.put(PageId::new(2), page(2));

        // Pin the LRU entry; the next put must pass over it.
        let pinned = cache.get(PageId::new(1)).unwrap();

        let (evicted_id, _) = cache.put(PageId::new(3), page(3)).unwrap();
        assert_eq!(evicted_id, PageId::new(2));

        pinned.unpin();
    }

    #[test]
    #[should_panic(expected = "all cache pages are pinned")]
    fn test_all_pinned_panics() {
        let cache = LruCache::new(2);
        cache.put(PageId::new(1), page(1));
        cache.put(PageId::new(2), page(2));

        let _a = cache.get(PageId::new(1)).unwrap();
        let _b = cache.get(PageId::new(2)).unwrap();

        cache.put(PageId::new(3), page(3));
    }

    #[test]
    fn test_replace_existing_returns_old() {
        let cache = LruCache::new(2);
        cache.put(PageId::new(1), page(1));

        let replaced = cache.put(PageId::new(1), page(1));
        let (id, _old) = replaced.unwrap();
        assert_eq!(id, PageId::new(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    #[should_panic(expected = "replace a pinned page")]
    fn test_replace_pinned_panics() {
        let cache = LruCache::new(2);
        cache.put(PageId::new(1), page(1));
        let _pin = cache.get(PageId::new(1)).unwrap();
        cache.put(PageId::new(1), page(1));
    }

    #[test]
    fn test_remove() {
        let cache = LruCache::new(2);
        cache.put(PageId::new(1), page(1));

        assert!(cache.remove(PageId::new(1)).is_some());
        assert!(cache.get(PageId::new(1)).is_none());
        assert!(cache.remove(PageId::new(1)).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_for_each_mru_to_lru() {
        let cache = LruCache::new(3);
        cache.put(PageId::new(1), page(1));
        cache.put(PageId::new(2), page(2));
        cache.put(PageId::new(3), page(3));
        cache.get(PageId::new(1)).unwrap().unpin();

        let mut order = Vec::new();
        cache.for_each(|id, _| {
            order.push(id.as_u32());
            true
        });
        assert_eq!(order, vec![1, 3, 2]);
    }

    #[test]
    fn test_for_each_early_stop() {
        let cache = LruCache::new(3);
        cache.put(PageId::new(1), page(1));
        cache.put(PageId::new(2), page(2));

        let mut seen = 0;
        cache.for_each(|_, _| {
            seen += 1;
            false
        });
        assert_eq!(seen, 1);
    }
}
