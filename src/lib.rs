//! Basalt - the storage-engine core of a disk-oriented RDBMS
//!
//! The crate provides the paged storage foundation a relational database
//! sits on: a buffer pool caching fixed-size disk pages, an LRU-K frame
//! replacement policy, an extendible hash directory used as the
//! page-to-frame table, and a concurrent B+ tree index over
//! buffer-pool-managed pages.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): disk I/O and page layouts
//!   - `DiskManager`: reads and writes pages at fixed file offsets
//!   - `DiskScheduler`: background worker thread for disk requests
//!   - `TreeNode`/`TreeNodeRef`: B+ tree node page views
//!   - `HeaderPage`: the reserved page 0 mapping index names to roots
//!
//! - **Buffer Pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: pins pages into frames, evicts via LRU-K
//!   - `LruKReplacer`: backward-k-distance eviction policy
//!   - `Frame`: per-frame metadata plus the page bytes and page latch
//!   - `ReadPageGuard`/`WritePageGuard`: RAII pin-and-latch guards
//!
//! - **Containers** (`container`): `ExtendibleHashTable`, the in-memory
//!   page table with dynamic directory doubling
//!
//! - **Concurrency** (`concurrency`): `Transaction`, the latched-page
//!   and deleted-page bookkeeping used by latch crabbing
//!
//! - **Index** (`index`): `BPlusTree` with optimistic/pessimistic latch
//!   crabbing and `IndexIterator` over the leaf chain
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use basalt::buffer::BufferPoolManager;
//! use basalt::concurrency::Transaction;
//! use basalt::index::{BPlusTree, IntegerComparator};
//! use basalt::storage::disk::DiskManager;
//! use basalt::{PageId, RecordId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
//!
//! let tree = BPlusTree::new("pk", bpm, IntegerComparator).unwrap();
//! let mut txn = Transaction::new();
//! tree.insert(42, RecordId::new(PageId::new(7), SlotId::new(0)), &mut txn)
//!     .unwrap();
//! assert_eq!(tree.get_value(42).unwrap().len(), 1);
//! ```

pub mod buffer;
pub mod common;
pub mod concurrency;
pub mod container;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{BasaltError, KeyType, PageId, RecordId, Result, SlotId};
