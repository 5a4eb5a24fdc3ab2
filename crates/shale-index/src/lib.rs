//! B+ tree index for ShaleDB.
//!
//! The tree lives entirely in buffer-pool pages: internal pages route
//! searches, leaf pages hold `(key, rid)` pairs and chain together for
//! range scans. The root page id of every index is persisted in the header
//! page at page id 0.

pub mod header;
pub mod iterator;
pub mod node;
pub mod tree;

pub use header::HeaderPage;
pub use iterator::IndexIterator;
pub use node::{InternalNode, LeafNode, NodeHeader, NodeType};
pub use tree::{BPlusTree, BTreeConfig};
