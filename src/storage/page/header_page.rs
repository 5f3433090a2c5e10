use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::common::types::{Page, PageId, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::page::error::PageError;

/// Catalog of index roots persisted in the header page
#[derive(Debug, Default, Serialize, Deserialize)]
struct RootCatalog {
    roots: HashMap<String, PageId>,
}

// Bytes [20, 28) hold the (unused) page LSN; the bincode blob follows a
// length word at 28.
const BLOB_LEN_OFFSET: usize = 28;
const BLOB_OFFSET: usize = 32;

/// The header page: a reserved page (id `HEADER_PAGE_ID`) mapping index
/// names to their root page ids so indexes can be reopened across restarts.
pub struct HeaderPage;

impl HeaderPage {
    /// Look up an index's root page id
    pub fn get_root(
        buffer_pool: &BufferPoolManager,
        index_name: &str,
    ) -> Result<Option<PageId>, BufferPoolError> {
        let page = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let root = {
            let guard = page.read();
            Self::read_catalog(&guard)
                .map(|catalog| catalog.roots.get(index_name).copied())
                .unwrap_or(None)
        };
        buffer_pool.unpin_page(HEADER_PAGE_ID, false)?;
        Ok(root.filter(|&id| id != INVALID_PAGE_ID))
    }

    /// Record (or update) an index's root page id
    pub fn set_root(
        buffer_pool: &BufferPoolManager,
        index_name: &str,
        root_page_id: PageId,
    ) -> Result<(), BufferPoolError> {
        let page = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut guard = page.write();
            let mut catalog = Self::read_catalog(&guard).unwrap_or_default();
            catalog.roots.insert(index_name.to_string(), root_page_id);
            Self::write_catalog(&mut guard, &catalog)
                .map_err(|e| BufferPoolError::InvalidOperation(e.to_string()))?;
        }
        buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;
        Ok(())
    }

    fn read_catalog(page: &Page) -> Option<RootCatalog> {
        let len = LittleEndian::read_u32(&page.data[BLOB_LEN_OFFSET..BLOB_LEN_OFFSET + 4]) as usize;
        if len == 0 {
            return Some(RootCatalog::default());
        }
        if BLOB_OFFSET + len > page.data.len() {
            return None;
        }
        bincode::deserialize(&page.data[BLOB_OFFSET..BLOB_OFFSET + len]).ok()
    }

    fn write_catalog(page: &mut Page, catalog: &RootCatalog) -> Result<(), PageError> {
        let blob =
            bincode::serialize(catalog).map_err(|e| PageError::Corrupted(e.to_string()))?;
        if BLOB_OFFSET + blob.len() > page.data.len() {
            return Err(PageError::InsufficientSpace);
        }
        LittleEndian::write_u32(
            &mut page.data[BLOB_LEN_OFFSET..BLOB_LEN_OFFSET + 4],
            blob.len() as u32,
        );
        page.data[BLOB_OFFSET..BLOB_OFFSET + blob.len()].copy_from_slice(&blob);
        page.page_id = HEADER_PAGE_ID;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_root_mapping_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let pool = BufferPoolManager::new(4, file.path()).unwrap();

        assert_eq!(HeaderPage::get_root(&pool, "orders_pk").unwrap(), None);

        HeaderPage::set_root(&pool, "orders_pk", 7).unwrap();
        HeaderPage::set_root(&pool, "users_pk", 9).unwrap();
        assert_eq!(HeaderPage::get_root(&pool, "orders_pk").unwrap(), Some(7));
        assert_eq!(HeaderPage::get_root(&pool, "users_pk").unwrap(), Some(9));

        // Overwrites and tombstones
        HeaderPage::set_root(&pool, "orders_pk", 12).unwrap();
        assert_eq!(HeaderPage::get_root(&pool, "orders_pk").unwrap(), Some(12));
        HeaderPage::set_root(&pool, "orders_pk", INVALID_PAGE_ID).unwrap();
        assert_eq!(HeaderPage::get_root(&pool, "orders_pk").unwrap(), None);

        assert!(pool.check_all_unpinned());
    }
}
