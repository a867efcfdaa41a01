//! Stratum - the storage core of a small single-node relational database.
//!
//! The crate provides the paged file, the in-memory page cache and the
//! primary-key index that a query layer builds on. Data lives in a single
//! file of fixed 4 KB pages; page 0 is an allocation bitmap, every other
//! page belongs to a caller-defined structure (a row heap or a B+ tree
//! node - the page format is not self-describing).
//!
//! # Architecture
//!
//! Bottom-up:
//!
//! - **Storage** (`storage::Storage`): positioned reads and writes over a
//!   file ([`FileStorage`](storage::FileStorage)) or an in-memory blob
//!   for tests ([`MemoryStorage`](storage::MemoryStorage)).
//! - **Pages** (`buffer`): [`Page`](buffer::Page) pairs a 4 KB buffer
//!   with a reader/writer lock, a dirty flag and an atomic pin count;
//!   [`PageRef`](buffer::PageRef) is the RAII pin handed to callers.
//! - **Cache** (`buffer::LruCache`): bounded id -> page map with LRU
//!   eviction that refuses to evict pinned pages.
//! - **Pager** (`storage::Pager`): fetches pages through the cache,
//!   allocates new ids from the bitmap on page 0, grows the file, and
//!   flushes dirty pages back out.
//! - **Index** (`index::BTree`): an order-preserving B+ tree mapping u32
//!   keys to u32 row identifiers, with a forward
//!   [`Cursor`](index::Cursor) over its leaf chain.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stratum::index::BTree;
//! use stratum::storage::{FileStorage, Pager};
//! use stratum::RowId;
//!
//! # fn main() -> stratum::Result<()> {
//! let storage = FileStorage::open("test.db")?;
//! let pager = Arc::new(Pager::new(256, Box::new(storage))?);
//!
//! let tree = BTree::new(Arc::clone(&pager))?;
//! tree.insert(42, RowId::new(stratum::PageId::new(7), 3).as_u32())?;
//!
//! let cursor = tree.search(42);
//! let (key, value) = cursor.get();
//! assert_eq!((key, RowId(value).row_index()), (42, 3));
//! cursor.close();
//!
//! pager.sync_all()?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{PageId, Result, RowId, StratumError, INVALID_PAGE_ID, PAGE_SIZE};
