//! Page-grained disk I/O for ShaleDB.

pub mod manager;

pub use manager::{DiskManager, DiskManagerConfig};
