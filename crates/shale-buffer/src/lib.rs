//! ShaleDB buffer management.
//!
//! The buffer pool mediates all access between fixed-size in-memory page
//! frames and the backing disk manager. Victim selection uses an LRU-K
//! policy; the page-id to frame lookup table is an extendible hash table.

pub mod frame;
pub mod page_table;
pub mod pool;
pub mod replacer;

pub use frame::Frame;
pub use page_table::ExtendibleHashTable;
pub use pool::{BufferPoolConfig, BufferPoolManager, PageReadGuard, PageWriteGuard};
pub use replacer::{LruKReplacer, Replacer};
