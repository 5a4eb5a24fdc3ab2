//! Buffer pool manager.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

use shale_common::{FrameId, PageId, Result, ShaleError, HEADER_PAGE_ID, PAGE_SIZE};
use shale_disk::DiskManager;

use crate::frame::Frame;
use crate::page_table::ExtendibleHashTable;
use crate::replacer::{LruKReplacer, Replacer};

/// Entries per page-table bucket.
const PAGE_TABLE_BUCKET_SIZE: usize = 4;

/// Configuration for the buffer pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub pool_size: usize,
    /// K parameter of the LRU-K replacement policy.
    pub replacer_k: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 1024,
            replacer_k: 2,
        }
    }
}

/// Buffer pool manager.
///
/// Owns a fixed array of page frames, the page-id to frame-id table (an
/// extendible hash), a free list, the LRU-K replacer, and the disk manager.
/// All page I/O funnels through here: a page enters a frame on fetch or
/// creation, stays while pinned or evictable, is written back when dirty and
/// evicted, and leaves through deletion.
///
/// One pool mutex serialises every public operation for its whole duration.
/// The replacer and page table take their own latches underneath; the lock
/// order is always pool, then replacer or page table, so there are no cycles.
pub struct BufferPoolManager {
    frames: Vec<Frame>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
    disk: Arc<DiskManager>,
    latch: Mutex<PoolState>,
}

struct PoolState {
    free_list: VecDeque<FrameId>,
    /// Monotonic page id allocator. In-memory only; id 0 is reserved for
    /// the index header page.
    next_page_id: PageId,
}

impl BufferPoolManager {
    /// Creates a new buffer pool over the given disk manager.
    ///
    /// The page id allocator resumes after the last page of the existing
    /// database file, so reopening a file never hands out colliding ids.
    pub fn new(config: BufferPoolConfig, disk: Arc<DiskManager>) -> Self {
        let pool_size = config.pool_size;
        let mut frames = Vec::with_capacity(pool_size);
        frames.resize_with(pool_size, Frame::new);

        let next_page_id = (disk.num_pages() as PageId).max(HEADER_PAGE_ID + 1);

        Self {
            frames,
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            replacer: LruKReplacer::new(pool_size, config.replacer_k),
            disk,
            latch: Mutex::new(PoolState {
                free_list: (0..pool_size).collect(),
                next_page_id,
            }),
        }
    }

    /// Returns the number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Returns the number of frames that could hold a new page right now.
    pub fn free_frame_count(&self) -> usize {
        let state = self.latch.lock();
        state.free_list.len() + self.replacer.size()
    }

    /// Returns true if the page is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.find(&page_id).is_some()
    }

    /// Returns a page's pin count, or None if it is not resident.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let frame_id = self.page_table.find(&page_id)?;
        Some(self.frames[frame_id].pin_count())
    }

    /// Obtains a usable frame: from the free list, or by evicting a victim
    /// (writing it back first if dirty). The frame is returned reset.
    fn allocate_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self.replacer.evict().ok_or(ShaleError::BufferPoolFull)?;
        let frame = &self.frames[frame_id];
        debug_assert_eq!(frame.pin_count(), 0, "evicted a pinned frame");

        if let Some(old_page_id) = frame.page_id() {
            if frame.is_dirty() {
                log::debug!("evicting dirty page {}, writing back", old_page_id);
                let data = frame.read_data();
                self.disk.write_page(old_page_id, &data)?;
            }
            self.page_table.remove(&old_page_id);
        }

        frame.reset();
        Ok(frame_id)
    }

    /// Registers a freshly filled frame with the page table and replacer,
    /// pinned and non-evictable.
    fn register_frame(&self, page_id: PageId, frame_id: FrameId) {
        let frame = &self.frames[frame_id];
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();

        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
    }

    /// Allocates a brand-new zeroed page, pinned for writing.
    ///
    /// Fails with `BufferPoolFull` when the free list is empty and no frame
    /// is evictable.
    pub fn new_page(&self) -> Result<PageWriteGuard<'_>> {
        let mut state = self.latch.lock();

        let frame_id = self.allocate_frame(&mut state)?;
        let page_id = state.next_page_id;
        state.next_page_id += 1;

        self.register_frame(page_id, frame_id);

        Ok(PageWriteGuard {
            pool: self,
            page_id,
            frame: &self.frames[frame_id],
        })
    }

    fn fetch_frame(&self, page_id: PageId) -> Result<FrameId> {
        assert!(page_id >= 0, "fetch of invalid page id {}", page_id);
        let mut state = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            self.frames[frame_id].pin();
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(frame_id);
        }

        let frame_id = self.allocate_frame(&mut state)?;
        {
            let frame = &self.frames[frame_id];
            let mut data = frame.write_data();
            self.disk.read_page(page_id, &mut data)?;
        }
        self.register_frame(page_id, frame_id);
        Ok(frame_id)
    }

    /// Fetches a page for reading, loading it from disk if necessary.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        let frame_id = self.fetch_frame(page_id)?;
        Ok(PageReadGuard {
            pool: self,
            page_id,
            frame: &self.frames[frame_id],
        })
    }

    /// Fetches a page for writing, loading it from disk if necessary.
    pub fn fetch_page_mut(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        let frame_id = self.fetch_frame(page_id)?;
        Ok(PageWriteGuard {
            pool: self,
            page_id,
            frame: &self.frames[frame_id],
        })
    }

    /// Drops one pin on a page, optionally marking it dirty.
    ///
    /// Dirtiness is sticky: once set it survives until a flush. Returns
    /// false if the page is not resident or was not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _state = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id];
        if frame.pin_count() == 0 {
            return false;
        }

        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Writes a page through to disk and clears its dirty bit.
    ///
    /// The pin count is irrelevant; flushing a pinned page is legal. Fails
    /// with `PageNotFound` if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let _state = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Err(ShaleError::PageNotFound { page_id });
        };
        let frame = &self.frames[frame_id];
        {
            let data = frame.read_data();
            self.disk.write_page(page_id, &data)?;
        }
        frame.set_dirty(false);
        Ok(())
    }

    /// Writes every resident page to disk and clears its dirty bit.
    ///
    /// Frames holding no page are skipped.
    pub fn flush_all_pages(&self) -> Result<()> {
        let _state = self.latch.lock();

        for frame in &self.frames {
            let Some(page_id) = frame.page_id() else {
                continue;
            };
            {
                let data = frame.read_data();
                self.disk.write_page(page_id, &data)?;
            }
            frame.set_dirty(false);
        }
        Ok(())
    }

    /// Removes a page from the pool, returning its frame to the free list.
    ///
    /// Deleting a page that is not resident is a no-op. Fails with
    /// `PagePinned` if the page is still in use.
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let mut state = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(());
        };
        let frame = &self.frames[frame_id];
        if frame.pin_count() != 0 {
            return Err(ShaleError::PagePinned { page_id });
        }

        self.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        frame.reset();
        state.free_list.push_back(frame_id);
        self.disk.deallocate_page(page_id);
        Ok(())
    }
}

impl std::fmt::Debug for BufferPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPoolManager")
            .field("pool_size", &self.frames.len())
            .field("free_frames", &self.free_frame_count())
            .finish()
    }
}

/// RAII read guard for a page. Holds one pin, released on drop.
pub struct PageReadGuard<'a> {
    pool: &'a BufferPoolManager,
    page_id: PageId,
    frame: &'a Frame,
}

impl PageReadGuard<'_> {
    /// Returns the page id.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page data.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.read_data()
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, false);
    }
}

/// RAII write guard for a page. Holds one pin, released on drop; the drop
/// reports the frame's dirty state back to the pool.
pub struct PageWriteGuard<'a> {
    pool: &'a BufferPoolManager,
    page_id: PageId,
    frame: &'a Frame,
}

impl PageWriteGuard<'_> {
    /// Returns the page id.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page data.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.read_data()
    }

    /// Returns mutable access to the page data.
    pub fn data_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.write_data()
    }

    /// Marks the page dirty so eviction and drop write it back.
    pub fn mark_dirty(&self) {
        self.frame.set_dirty(true);
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, self.frame.is_dirty());
    }
}
