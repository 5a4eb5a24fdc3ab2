//! Disk manager for page-level file I/O.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use shale_common::{PageId, Result, PAGE_SIZE};

/// Configuration for the disk manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskManagerConfig {
    /// Path of the database file.
    pub path: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./shale.db"),
            fsync_enabled: true,
        }
    }
}

/// Manages reading and writing fixed-size pages in a single database file.
///
/// Pages are addressed by id; page `n` lives at byte offset `n * PAGE_SIZE`.
/// Both operations are synchronous and blocking. I/O errors propagate to the
/// caller and are treated as fatal; there is no retry.
pub struct DiskManager {
    config: DiskManagerConfig,
    inner: Mutex<FileHandle>,
}

struct FileHandle {
    file: File,
    /// Number of pages the file currently spans.
    num_pages: u32,
}

impl DiskManager {
    /// Opens or creates the database file.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        if let Some(dir) = config.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&config.path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            config,
            inner: Mutex::new(FileHandle { file, num_pages }),
        })
    }

    /// Returns the database file path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Reads a page from disk into `buf`.
    ///
    /// Pages that were allocated but never written read back as zeroes.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        assert!(page_id >= 0, "read_page called with invalid page id");

        let mut inner = self.inner.lock();
        if page_id as u32 >= inner.num_pages {
            buf.fill(0);
            return Ok(());
        }

        let offset = (page_id as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        assert!(page_id >= 0, "write_page called with invalid page id");

        let mut inner = self.inner.lock();
        let offset = (page_id as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(data)?;

        if self.config.fsync_enabled {
            inner.file.sync_all()?;
        }

        if page_id as u32 >= inner.num_pages {
            inner.num_pages = page_id as u32 + 1;
        }

        Ok(())
    }

    /// Releases a page's disk slot.
    ///
    /// Kept for interface parity with the buffer pool's delete path; the
    /// file is not shrunk and the slot is not reused.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    /// Returns the number of pages the database file spans.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    /// Flushes pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.inner.lock().file.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_disk_manager() -> (DiskManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = DiskManagerConfig {
            path: dir.path().join("test.db"),
            fsync_enabled: false,
        };
        let dm = DiskManager::new(config).unwrap();
        (dm, dir)
    }

    #[test]
    fn test_disk_manager_new() {
        let (dm, _dir) = create_test_disk_manager();
        assert!(dm.path().exists());
        assert_eq!(dm.num_pages(), 0);
    }

    #[test]
    fn test_disk_manager_write_read() {
        let (dm, _dir) = create_test_disk_manager();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[100] = 0xCD;
        data[PAGE_SIZE - 1] = 0xEF;
        dm.write_page(3, &data).unwrap();

        let mut read_back = [0u8; PAGE_SIZE];
        dm.read_page(3, &mut read_back).unwrap();
        assert_eq!(read_back[0], 0xAB);
        assert_eq!(read_back[100], 0xCD);
        assert_eq!(read_back[PAGE_SIZE - 1], 0xEF);
    }

    #[test]
    fn test_disk_manager_read_unwritten_page_is_zeroed() {
        let (dm, _dir) = create_test_disk_manager();

        let mut buf = [0xFFu8; PAGE_SIZE];
        dm.read_page(99, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_disk_manager_write_extends_file() {
        let (dm, _dir) = create_test_disk_manager();

        assert_eq!(dm.num_pages(), 0);
        dm.write_page(0, &[0u8; PAGE_SIZE]).unwrap();
        assert_eq!(dm.num_pages(), 1);
        dm.write_page(4, &[0u8; PAGE_SIZE]).unwrap();
        assert_eq!(dm.num_pages(), 5);
    }

    #[test]
    fn test_disk_manager_overwrite_page() {
        let (dm, _dir) = create_test_disk_manager();

        let mut data1 = [0u8; PAGE_SIZE];
        data1[0] = 0xAA;
        dm.write_page(0, &data1).unwrap();

        let mut data2 = [0u8; PAGE_SIZE];
        data2[0] = 0xBB;
        dm.write_page(0, &data2).unwrap();

        let mut read_back = [0u8; PAGE_SIZE];
        dm.read_page(0, &mut read_back).unwrap();
        assert_eq!(read_back[0], 0xBB);
    }

    #[test]
    fn test_disk_manager_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persist.db");

        {
            let config = DiskManagerConfig {
                path: path.clone(),
                fsync_enabled: true,
            };
            let dm = DiskManager::new(config).unwrap();
            let mut data = [0u8; PAGE_SIZE];
            data[0] = 0xFF;
            dm.write_page(2, &data).unwrap();
        }

        {
            let config = DiskManagerConfig {
                path,
                fsync_enabled: true,
            };
            let dm = DiskManager::new(config).unwrap();
            assert_eq!(dm.num_pages(), 3);

            let mut read_back = [0u8; PAGE_SIZE];
            dm.read_page(2, &mut read_back).unwrap();
            assert_eq!(read_back[0], 0xFF);
        }
    }

    #[test]
    fn test_disk_manager_deallocate_is_noop() {
        let (dm, _dir) = create_test_disk_manager();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0x11;
        dm.write_page(0, &data).unwrap();
        dm.deallocate_page(0);

        let mut read_back = [0u8; PAGE_SIZE];
        dm.read_page(0, &mut read_back).unwrap();
        assert_eq!(read_back[0], 0x11);
        assert_eq!(dm.num_pages(), 1);
    }

    #[test]
    fn test_disk_manager_flush() {
        let (dm, _dir) = create_test_disk_manager();
        dm.write_page(0, &[0u8; PAGE_SIZE]).unwrap();
        dm.flush().unwrap();
    }

    #[test]
    #[should_panic]
    fn test_disk_manager_read_invalid_page_id_panics() {
        let (dm, _dir) = create_test_disk_manager();
        let mut buf = [0u8; PAGE_SIZE];
        let _ = dm.read_page(-1, &mut buf);
    }

    #[test]
    fn test_disk_manager_config_serde_roundtrip() {
        let original = DiskManagerConfig::default();
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: DiskManagerConfig = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original.path, deserialized.path);
        assert_eq!(original.fsync_enabled, deserialized.fsync_enabled);
    }
}
