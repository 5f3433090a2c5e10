pub mod internal;
pub mod leaf;

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId};

/// Common B+tree page header:
/// `page_id:u32, parent:u32, page_type:u32, size:i32, max_size:i32, lsn:u64`.
pub const BTREE_PAGE_HEADER_SIZE: usize = 28;

const PAGE_ID_OFFSET: usize = 0;
const PARENT_OFFSET: usize = 4;
const PAGE_TYPE_OFFSET: usize = 8;
const SIZE_OFFSET: usize = 12;
const MAX_SIZE_OFFSET: usize = 16;
// Bytes [20, 28) hold the page LSN (see PAGE_LSN_OFFSET).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BTreePageType {
    Internal = 1,
    Leaf = 2,
}

pub fn is_leaf(page: &Page) -> bool {
    LittleEndian::read_u32(&page.data[PAGE_TYPE_OFFSET..PAGE_TYPE_OFFSET + 4])
        == BTreePageType::Leaf as u32
}

pub fn set_page_type(page: &mut Page, page_type: BTreePageType) {
    LittleEndian::write_u32(
        &mut page.data[PAGE_TYPE_OFFSET..PAGE_TYPE_OFFSET + 4],
        page_type as u32,
    );
}

pub fn page_id(page: &Page) -> PageId {
    LittleEndian::read_u32(&page.data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4])
}

pub fn set_page_id(page: &mut Page, id: PageId) {
    LittleEndian::write_u32(&mut page.data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4], id);
}

pub fn parent_page_id(page: &Page) -> PageId {
    LittleEndian::read_u32(&page.data[PARENT_OFFSET..PARENT_OFFSET + 4])
}

pub fn set_parent_page_id(page: &mut Page, parent: PageId) {
    LittleEndian::write_u32(&mut page.data[PARENT_OFFSET..PARENT_OFFSET + 4], parent);
}

pub fn size(page: &Page) -> i32 {
    LittleEndian::read_i32(&page.data[SIZE_OFFSET..SIZE_OFFSET + 4])
}

pub fn set_size(page: &mut Page, size: i32) {
    LittleEndian::write_i32(&mut page.data[SIZE_OFFSET..SIZE_OFFSET + 4], size);
}

pub fn max_size(page: &Page) -> i32 {
    LittleEndian::read_i32(&page.data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4])
}

pub fn set_max_size(page: &mut Page, max_size: i32) {
    LittleEndian::write_i32(&mut page.data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4], max_size);
}
