use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::config::PAGE_SIZE;
use crate::common::types::{Page, PageId, INVALID_PAGE_ID};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager handles the actual disk I/O: pages in the database file,
/// log records in the sibling write-ahead log file.
pub struct DiskManager {
    db_file: Mutex<File>,
    log_file: Mutex<File>,
}

impl DiskManager {
    /// Open (or create) the database file and its write-ahead log. The first
    /// page of the database file is reserved for the header page, so the
    /// file is extended to hold it up front.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let db_path = db_path.as_ref();
        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        // Reserve page 1 (the header page) so allocation starts at page 2.
        if db_file.metadata()?.len() < PAGE_SIZE as u64 {
            db_file.set_len(PAGE_SIZE as u64)?;
        }

        let mut log_path = db_path.as_os_str().to_owned();
        log_path.push(".wal");
        let log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&log_path)?;

        Ok(Self {
            db_file: Mutex::new(db_file),
            log_file: Mutex::new(log_file),
        })
    }

    /// Read a page from disk. A page beyond the end of the file (allocated
    /// but never written) comes back zero-filled.
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = Self::page_offset(page_id);
        let mut file = self.db_file.lock();

        let file_size = file.metadata()?.len();
        if offset >= file_size {
            *page = Page::new(page_id);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut page.data)?;
        page.page_id = page_id;

        Ok(())
    }

    /// Write a page to disk
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = Self::page_offset(page.page_id);
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&page.data)?;
        file.flush()?;

        Ok(())
    }

    /// Allocate a new page on disk and return its ID
    pub fn allocate_page(&self) -> Result<PageId, DiskManagerError> {
        let mut file = self.db_file.lock();

        let file_size = file.metadata()?.len();
        let new_page_id = (file_size / PAGE_SIZE as u64) as PageId + 1;

        file.seek(SeekFrom::End(0))?;
        let zeros = [0u8; PAGE_SIZE];
        file.write_all(&zeros)?;
        file.flush()?;

        Ok(new_page_id)
    }

    /// Deallocate a page by zeroing its region. The page id itself is not
    /// reused until the file is compacted.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = Self::page_offset(page_id);
        let mut file = self.db_file.lock();
        if offset < file.metadata()?.len() {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&[0u8; PAGE_SIZE])?;
            file.flush()?;
        }

        Ok(())
    }

    /// Append bytes to the write-ahead log and sync them to stable storage.
    pub fn write_log(&self, data: &[u8]) -> Result<(), DiskManagerError> {
        if data.is_empty() {
            return Ok(());
        }
        let mut file = self.log_file.lock();
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        file.sync_data()?;
        Ok(())
    }

    /// Read log bytes at the given byte offset. Returns the number of bytes
    /// read; zero means the offset is at or past the end of the log.
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> Result<usize, DiskManagerError> {
        let mut file = self.log_file.lock();
        let file_size = file.metadata()?.len();
        if offset >= file_size {
            return Ok(0);
        }

        let available = (file_size - offset) as usize;
        let to_read = buf.len().min(available);
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf[..to_read])?;

        Ok(to_read)
    }

    fn page_offset(page_id: PageId) -> u64 {
        (page_id as u64 - 1) * PAGE_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn test_disk_manager() -> (DiskManager, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let dm = DiskManager::new(file.path()).unwrap();
        (dm, file)
    }

    #[test]
    fn test_page_roundtrip() {
        let (dm, _file) = test_disk_manager();

        let page_id = dm.allocate_page().unwrap();
        assert_eq!(page_id, 2); // page 1 is the reserved header page

        let mut page = Page::new(page_id);
        page.data[0] = 0xAB;
        page.data[PAGE_SIZE - 1] = 0xCD;
        dm.write_page(&page).unwrap();

        let mut read_back = Page::new(0);
        dm.read_page(page_id, &mut read_back).unwrap();
        assert_eq!(read_back.page_id, page_id);
        assert_eq!(read_back.data[0], 0xAB);
        assert_eq!(read_back.data[PAGE_SIZE - 1], 0xCD);
    }

    #[test]
    fn test_read_unwritten_page_is_zeroed() {
        let (dm, _file) = test_disk_manager();
        let page_id = dm.allocate_page().unwrap();

        let mut page = Page::new(0);
        page.data[10] = 0xFF;
        dm.read_page(page_id, &mut page).unwrap();
        assert!(page.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_log_roundtrip() {
        let (dm, _file) = test_disk_manager();

        dm.write_log(b"hello").unwrap();
        dm.write_log(b" world").unwrap();

        let mut buf = [0u8; 32];
        let n = dm.read_log(&mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"hello world");

        let n = dm.read_log(&mut buf, 6).unwrap();
        assert_eq!(&buf[..n], b"world");

        // Past the end
        let n = dm.read_log(&mut buf, 100).unwrap();
        assert_eq!(n, 0);
    }
}
