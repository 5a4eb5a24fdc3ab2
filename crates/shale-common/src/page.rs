//! Page identifiers and on-disk constants.

use serde::{Deserialize, Serialize};

/// Size of a disk page in bytes (4 KB).
pub const PAGE_SIZE: usize = 4096;

/// Identifier of a page on disk. Assigned by the buffer pool at creation
/// and stable for the page's lifetime.
pub type PageId = i32;

/// Sentinel page id meaning "no page".
pub const INVALID_PAGE_ID: PageId = -1;

/// Page id of the index header page. Reserved; never handed out by the
/// buffer pool's allocator.
pub const HEADER_PAGE_ID: PageId = 0;

/// Index of a slot in the buffer pool's frame array.
pub type FrameId = usize;

/// Record locator: identifies a tuple by its heap page and slot number.
///
/// This is the value type stored in B+ tree leaves. Serialized as 8 bytes:
/// page_id (4, LE) followed by slot (4, LE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rid {
    /// Page holding the record.
    pub page_id: PageId,
    /// Slot number within the page.
    pub slot: u32,
}

impl Rid {
    /// Serialized size in bytes.
    pub const SIZE: usize = 8;

    /// Creates a new record locator.
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.page_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot.to_le_bytes());
        buf
    }

    /// Deserializes from bytes.
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            page_id: i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            slot: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_id, self.slot)
    }
}
