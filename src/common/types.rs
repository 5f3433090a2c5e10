use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::config::PAGE_SIZE;
use crate::common::rwlatch::RwLatch;

/// Page ID type. Page 0 is never a valid page.
pub type PageId = u32;

/// Transaction ID type
pub type TxnId = u32;

/// LSN (Log Sequence Number) type
pub type Lsn = u64;

/// Buffer pool frame ID type
pub type FrameId = u32;

/// Sentinel for "no page"
pub const INVALID_PAGE_ID: PageId = 0;

/// Reserved page holding the index-name to root-page mapping
pub const HEADER_PAGE_ID: PageId = 1;

/// Sentinel for "no log record"
pub const INVALID_LSN: Lsn = 0;

/// Byte offset of the page LSN. Every page layout in this crate reserves
/// bytes [20, 28) of its header for the LSN so the buffer pool and recovery
/// can read it without knowing the page kind.
pub const PAGE_LSN_OFFSET: usize = 20;

/// Record identifier: a tuple's physical address.
/// Total-ordered by (page_id, slot) and immutable once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}

/// An opaque tuple payload. Before/after images in log records and
/// transaction write sets are carried as tuples.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tuple {
    data: Vec<u8>,
}

impl Tuple {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Page structure: one fixed-size block of on-disk data.
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
        }
    }

    /// LSN of the last log record applied to this page.
    pub fn lsn(&self) -> Lsn {
        u64::from_le_bytes(
            self.data[PAGE_LSN_OFFSET..PAGE_LSN_OFFSET + 8]
                .try_into()
                .unwrap(),
        )
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.data[PAGE_LSN_OFFSET..PAGE_LSN_OFFSET + 8].copy_from_slice(&lsn.to_le_bytes());
    }
}

/// An in-memory page frame: the page contents plus the latch that guards
/// them. The latch is deliberately not an RAII lock; the B+tree's crabbing
/// protocol acquires and releases it across function boundaries.
pub struct PageFrame {
    latch: RwLatch,
    page: RwLock<Page>,
}

impl PageFrame {
    pub fn new(page: Page) -> Self {
        Self {
            latch: RwLatch::new(),
            page: RwLock::new(page),
        }
    }

    pub fn latch(&self) -> &RwLatch {
        &self.latch
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }

    pub fn page_id(&self) -> PageId {
        self.page.read().page_id
    }
}

/// Smart pointer to a page frame
pub type PagePtr = Arc<PageFrame>;

/// Buffer pool frame bookkeeping
pub struct Frame {
    pub page: PagePtr,
    pub frame_id: FrameId,
    pub is_dirty: bool,
    pub pin_count: u32,
}

impl Frame {
    pub fn new(frame_id: FrameId, page: PagePtr) -> Self {
        Self {
            page,
            frame_id,
            is_dirty: false,
            pin_count: 0,
        }
    }
}

/// Smart pointer to a frame
pub type FramePtr = Arc<RwLock<Frame>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rid_ordering() {
        let a = Rid::new(1, 5);
        let b = Rid::new(1, 6);
        let c = Rid::new(2, 0);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a, Rid::new(1, 5));
    }

    #[test]
    fn test_page_lsn_roundtrip() {
        let mut page = Page::new(3);
        assert_eq!(page.lsn(), INVALID_LSN);
        page.set_lsn(42);
        assert_eq!(page.lsn(), 42);
    }
}
