use std::sync::Arc;

use stratum::common::{PageId, StratumError, INVALID_PAGE_ID, PAGE_SIZE};
use stratum::storage::{FileStorage, Pager};

use tempfile::NamedTempFile;

fn file_pager(max_pages: usize) -> (Pager, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let storage = FileStorage::open(temp_file.path()).unwrap();
    let pager = Pager::new(max_pages, Box::new(storage)).unwrap();
    (pager, temp_file)
}

#[test]
fn test_new_pager_creates_index_page() {
    let (pager, temp) = file_pager(8);

    // An empty file is grown to one page for the allocation index.
    assert_eq!(
        std::fs::metadata(temp.path()).unwrap().len(),
        PAGE_SIZE as u64
    );
    assert_eq!(pager.first_page(), INVALID_PAGE_ID);
}

#[test]
fn test_unaligned_file_is_rejected() {
    let temp_file = NamedTempFile::new().unwrap();
    std::fs::write(temp_file.path(), [0u8; 100]).unwrap();

    let storage = FileStorage::open(temp_file.path()).unwrap();
    assert!(matches!(
        Pager::new(8, Box::new(storage)),
        Err(StratumError::InvalidStorageSize(100))
    ));
}

#[test]
fn test_allocate_covers_page_in_file() {
    let (pager, temp) = file_pager(8);

    for _ in 0..3 {
        let id = pager.allocate_page().unwrap();
        let len = std::fs::metadata(temp.path()).unwrap().len();
        assert!(len >= (id.as_u32() as u64 + 1) * PAGE_SIZE as u64);
    }
}

#[test]
fn test_fetch_unallocated_fails() {
    let (pager, _temp) = file_pager(8);

    assert!(matches!(
        pager.fetch_page(PageId::new(1)),
        Err(StratumError::PageNotAllocated(_))
    ));
}

#[test]
fn test_write_sync_reopen_round_trip() {
    let temp_file = NamedTempFile::new().unwrap();

    let id = {
        let storage = FileStorage::open(temp_file.path()).unwrap();
        let pager = Pager::new(8, Box::new(storage)).unwrap();
        let id = pager.allocate_page().unwrap();

        let page = pager.fetch_page(id).unwrap();
        {
            let mut data = page.data_mut();
            data[0] = 42;
            data[PAGE_SIZE - 1] = 128;
        }
        page.mark_dirty();
        drop(page);

        pager.sync_all().unwrap();
        id
    };

    let storage = FileStorage::open(temp_file.path()).unwrap();
    let pager = Pager::new(8, Box::new(storage)).unwrap();
    let page = pager.fetch_page(id).unwrap();
    let data = page.data();
    assert_eq!(data[0], 42);
    assert_eq!(data[PAGE_SIZE - 1], 128);
}

#[test]
fn test_allocation_survives_reopen() {
    let temp_file = NamedTempFile::new().unwrap();

    {
        let storage = FileStorage::open(temp_file.path()).unwrap();
        let pager = Pager::new(8, Box::new(storage)).unwrap();
        for _ in 0..10 {
            pager.allocate_page().unwrap();
        }
        pager.sync_metadata().unwrap();
    }

    let storage = FileStorage::open(temp_file.path()).unwrap();
    let pager = Pager::new(8, Box::new(storage)).unwrap();

    let mut id = pager.first_page();
    for expected in 1..=10u32 {
        assert_eq!(id, PageId::new(expected));
        id = pager.next_page(id);
    }
    assert_eq!(id, INVALID_PAGE_ID);
}

#[test]
fn test_eviction_preserves_data_under_pressure() {
    let (pager, _temp) = file_pager(2);

    let ids: Vec<_> = (0..8).map(|_| pager.allocate_page().unwrap()).collect();
    for (i, &id) in ids.iter().enumerate() {
        let page = pager.fetch_page(id).unwrap();
        page.data_mut()[0] = i as u8 + 1;
        page.mark_dirty();
    }

    // Only two frames exist, so most of those pages went through an
    // eviction flush. Everything must still read back.
    for (i, &id) in ids.iter().enumerate() {
        let page = pager.fetch_page(id).unwrap();
        assert_eq!(page.data()[0], i as u8 + 1);
    }
}

#[test]
#[should_panic(expected = "all cache pages are pinned")]
fn test_fetch_with_all_pages_pinned_aborts() {
    let (pager, _temp) = file_pager(2);

    let a = pager.allocate_page().unwrap();
    let b = pager.allocate_page().unwrap();
    let c = pager.allocate_page().unwrap();

    let _hold_a = pager.fetch_page(a).unwrap();
    let _hold_b = pager.fetch_page(b).unwrap();

    // The cache has no unpinned victim left.
    let _ = pager.fetch_page(c);
}

#[test]
fn test_pinned_pages_survive_eviction_pressure() {
    let (pager, _temp) = file_pager(2);

    let keep = pager.allocate_page().unwrap();
    let held = pager.fetch_page(keep).unwrap();
    held.data_mut()[7] = 99;
    held.mark_dirty();

    // Cycle many other pages through the remaining frame.
    for _ in 0..6 {
        let id = pager.allocate_page().unwrap();
        let page = pager.fetch_page(id).unwrap();
        page.data_mut()[0] = 1;
        page.mark_dirty();
    }

    // The pinned page was never evicted: its buffer is still live.
    assert!(held.is_pinned());
    assert_eq!(held.data()[7], 99);
}

#[test]
fn test_sync_all_is_idempotent() {
    let (pager, _temp) = file_pager(8);

    let id = pager.allocate_page().unwrap();
    {
        let page = pager.fetch_page(id).unwrap();
        page.data_mut()[0] = 5;
        page.mark_dirty();
    }

    pager.sync_all().unwrap();
    let first = pager.stats();
    pager.sync_all().unwrap();
    let second = pager.stats();

    assert_eq!(first.disk_writes, second.disk_writes);
}

#[test]
fn test_concurrent_fetch_and_sync() {
    use std::thread;

    let (pager, _temp) = file_pager(16);
    let pager = Arc::new(pager);

    let ids: Vec<_> = (0..8).map(|_| pager.allocate_page().unwrap()).collect();

    let writers: Vec<_> = (0..4usize)
        .map(|t| {
            let pager = Arc::clone(&pager);
            let ids = ids.clone();
            thread::spawn(move || {
                for round in 0..25u8 {
                    for &id in &ids {
                        let page = pager.fetch_page(id).unwrap();
                        page.data_mut()[t] = round;
                        page.mark_dirty();
                    }
                    if t == 0 {
                        pager.sync_all().unwrap();
                    }
                }
            })
        })
        .collect();

    for handle in writers {
        handle.join().unwrap();
    }
    pager.sync_all().unwrap();

    for &id in &ids {
        let page = pager.fetch_page(id).unwrap();
        assert!(!page.is_dirty());
        assert_eq!(&page.data()[..4], &[24, 24, 24, 24]);
    }
}
