use std::marker::PhantomData;

use byteorder::{ByteOrder, LittleEndian};

use crate::common::config::PAGE_SIZE;
use crate::common::types::{Page, PageId};
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::{self as header, BTreePageType, BTREE_PAGE_HEADER_SIZE};

/// Codec for internal pages: a sorted array of `(key, child_page_id)`
/// entries. The key in slot 0 is unused (left-infinity sentinel); `size`
/// counts entries including that sentinel slot.
pub struct InternalPage<K>(PhantomData<K>);

impl<K: IndexKey> InternalPage<K> {
    const ENTRY_SIZE: usize = K::ENCODED_LEN + 4;

    pub fn default_max_size() -> i32 {
        ((PAGE_SIZE - BTREE_PAGE_HEADER_SIZE) / Self::ENTRY_SIZE) as i32 - 1
    }

    pub fn init(page: &mut Page, page_id: PageId, parent_id: PageId, max_size: i32) {
        debug_assert!(max_size >= 3 && max_size <= Self::default_max_size());
        header::set_page_type(page, BTreePageType::Internal);
        header::set_page_id(page, page_id);
        header::set_parent_page_id(page, parent_id);
        header::set_size(page, 0);
        header::set_max_size(page, max_size);
        page.page_id = page_id;
    }

    pub fn min_size(page: &Page) -> i32 {
        (header::max_size(page) + 1) / 2
    }

    pub fn key_at(page: &Page, index: i32) -> K {
        let off = Self::entry_offset(index);
        K::decode(&page.data[off..off + K::ENCODED_LEN])
    }

    pub fn set_key_at(page: &mut Page, index: i32, key: &K) {
        let off = Self::entry_offset(index);
        key.encode(&mut page.data[off..off + K::ENCODED_LEN]);
    }

    pub fn value_at(page: &Page, index: i32) -> PageId {
        let off = Self::entry_offset(index) + K::ENCODED_LEN;
        LittleEndian::read_u32(&page.data[off..off + 4])
    }

    /// Index of the entry pointing at `child`, if any
    pub fn value_index(page: &Page, child: PageId) -> Option<i32> {
        (0..header::size(page)).find(|&i| Self::value_at(page, i) == child)
    }

    /// Child pointer to follow for `key`: the last separator <= key wins,
    /// slot 0 catches everything below the first separator.
    pub fn lookup(page: &Page, key: &K) -> PageId {
        let mut lo = 1i32;
        let mut hi = header::size(page) - 1;
        let mut result = 0i32;
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            if Self::key_at(page, mid) <= *key {
                result = mid;
                lo = mid + 1;
            } else {
                hi = mid - 1;
            }
        }
        Self::value_at(page, result)
    }

    /// Turn an empty page into a root with two children separated by `key`
    pub fn populate_new_root(page: &mut Page, left: PageId, key: &K, right: PageId) {
        debug_assert_eq!(header::size(page), 0);
        Self::set_value_at_raw(page, 0, left);
        Self::write_entry(page, 1, key, right);
        header::set_size(page, 2);
    }

    /// Insert `(key, new_child)` immediately after the entry holding
    /// `old_child`; returns the size after insertion.
    pub fn insert_node_after(page: &mut Page, old_child: PageId, key: &K, new_child: PageId) -> i32 {
        let index = Self::value_index(page, old_child)
            .expect("split child missing from its parent page")
            + 1;
        let size = header::size(page);
        Self::shift_right(page, index, size);
        Self::write_entry(page, index, key, new_child);
        header::set_size(page, size + 1);
        size + 1
    }

    pub fn remove(page: &mut Page, index: i32) {
        let size = header::size(page);
        debug_assert!(index >= 0 && index < size);
        Self::shift_left(page, index, size);
        header::set_size(page, size - 1);
    }

    /// Collapse a single-child root: hand back the orphan and empty the page
    pub fn remove_and_return_only_child(page: &mut Page) -> PageId {
        debug_assert_eq!(header::size(page), 1);
        let child = Self::value_at(page, 0);
        header::set_size(page, 0);
        child
    }

    pub fn push_back(page: &mut Page, key: &K, child: PageId) {
        let size = header::size(page);
        Self::write_entry(page, size, key, child);
        header::set_size(page, size + 1);
    }

    /// Prepend a child borrowed from the left sibling: the old head entry
    /// keeps its child but takes the pulled-down separator as its key.
    pub fn insert_front(page: &mut Page, child: PageId, separator: &K) {
        let size = header::size(page);
        Self::shift_right(page, 0, size);
        Self::set_value_at_raw(page, 0, child);
        Self::set_key_at(page, 1, separator);
        header::set_size(page, size + 1);
    }

    /// Split: move the upper half (including the entry whose key becomes the
    /// new separator, left in slot 0 as the sentinel) to `recipient`.
    /// Returns the number of entries moved so the caller can adopt the
    /// children.
    pub fn move_half_to(page: &mut Page, recipient: &mut Page) -> i32 {
        let total = header::size(page);
        debug_assert_eq!(total, header::max_size(page) + 1);
        let copy_index = total / 2;

        let src = Self::entry_offset(copy_index)..Self::entry_offset(total);
        let dst = Self::entry_offset(0);
        let len = src.len();
        recipient.data[dst..dst + len].copy_from_slice(&page.data[src]);

        header::set_size(page, copy_index);
        header::set_size(recipient, total - copy_index);
        total - copy_index
    }

    /// Coalesce: pull `separator` down into this page's sentinel slot, then
    /// append every entry to the left-hand `recipient`.
    pub fn move_all_to(page: &mut Page, recipient: &mut Page, separator: &K) {
        Self::set_key_at(page, 0, separator);

        let size = header::size(page);
        let start = header::size(recipient);
        let src = Self::entry_offset(0)..Self::entry_offset(size);
        let dst = Self::entry_offset(start);
        let len = src.len();
        recipient.data[dst..dst + len].copy_from_slice(&page.data[src]);

        header::set_size(recipient, start + size);
        header::set_size(page, 0);
    }

    fn entry_offset(index: i32) -> usize {
        BTREE_PAGE_HEADER_SIZE + index as usize * Self::ENTRY_SIZE
    }

    fn write_entry(page: &mut Page, index: i32, key: &K, child: PageId) {
        Self::set_key_at(page, index, key);
        Self::set_value_at_raw(page, index, child);
    }

    fn set_value_at_raw(page: &mut Page, index: i32, value: PageId) {
        let off = Self::entry_offset(index) + K::ENCODED_LEN;
        LittleEndian::write_u32(&mut page.data[off..off + 4], value);
    }

    fn shift_right(page: &mut Page, index: i32, size: i32) {
        if index < size {
            page.data.copy_within(
                Self::entry_offset(index)..Self::entry_offset(size),
                Self::entry_offset(index + 1),
            );
        }
    }

    fn shift_left(page: &mut Page, index: i32, size: i32) {
        if index + 1 < size {
            page.data.copy_within(
                Self::entry_offset(index + 1)..Self::entry_offset(size),
                Self::entry_offset(index),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::INVALID_PAGE_ID;

    type Internal = InternalPage<i64>;

    fn internal_root() -> Page {
        // children: 10 | 20 <=k | 30 (k >= 40)
        let mut page = Page::new(2);
        Internal::init(&mut page, 2, INVALID_PAGE_ID, 6);
        Internal::populate_new_root(&mut page, 10, &20, 20);
        Internal::insert_node_after(&mut page, 20, &40, 30);
        page
    }

    #[test]
    fn test_lookup_routes_by_separator() {
        let page = internal_root();
        assert_eq!(header::size(&page), 3);
        assert_eq!(Internal::lookup(&page, &5), 10);
        assert_eq!(Internal::lookup(&page, &20), 20);
        assert_eq!(Internal::lookup(&page, &39), 20);
        assert_eq!(Internal::lookup(&page, &40), 30);
        assert_eq!(Internal::lookup(&page, &100), 30);
    }

    #[test]
    fn test_value_index_and_remove() {
        let mut page = internal_root();
        assert_eq!(Internal::value_index(&page, 20), Some(1));
        assert_eq!(Internal::value_index(&page, 99), None);

        Internal::remove(&mut page, 1);
        assert_eq!(header::size(&page), 2);
        assert_eq!(Internal::lookup(&page, &20), 10);
        assert_eq!(Internal::lookup(&page, &40), 30);
    }

    #[test]
    fn test_split_keeps_separator_in_sentinel() {
        let mut page = Page::new(2);
        Internal::init(&mut page, 2, INVALID_PAGE_ID, 4);
        Internal::populate_new_root(&mut page, 100, &10, 101);
        Internal::insert_node_after(&mut page, 101, &20, 102);
        Internal::insert_node_after(&mut page, 102, &30, 103);
        Internal::insert_node_after(&mut page, 103, &40, 104);
        assert_eq!(header::size(&page), 5); // max_size + 1

        let mut recipient = Page::new(7);
        Internal::init(&mut recipient, 7, INVALID_PAGE_ID, 4);
        let moved = Internal::move_half_to(&mut page, &mut recipient);

        assert_eq!(moved, 3);
        assert_eq!(header::size(&page), 2);
        // The new node's slot-0 key is the separator to push up.
        assert_eq!(Internal::key_at(&recipient, 0), 20);
        assert_eq!(Internal::value_at(&recipient, 0), 102);
    }

    #[test]
    fn test_coalesce_pulls_separator_down() {
        let mut left = Page::new(2);
        Internal::init(&mut left, 2, INVALID_PAGE_ID, 6);
        Internal::populate_new_root(&mut left, 100, &10, 101);

        let mut right = Page::new(3);
        Internal::init(&mut right, 3, INVALID_PAGE_ID, 6);
        Internal::populate_new_root(&mut right, 102, &30, 103);

        Internal::move_all_to(&mut right, &mut left, &20);
        assert_eq!(header::size(&left), 4);
        let keys: Vec<i64> = (1..4).map(|i| Internal::key_at(&left, i)).collect();
        assert_eq!(keys, vec![10, 20, 30]);
        let children: Vec<PageId> = (0..4).map(|i| Internal::value_at(&left, i)).collect();
        assert_eq!(children, vec![100, 101, 102, 103]);
    }

    #[test]
    fn test_borrowing_front_and_back() {
        let mut page = Page::new(2);
        Internal::init(&mut page, 2, INVALID_PAGE_ID, 6);
        Internal::populate_new_root(&mut page, 100, &10, 101);

        // Borrow from a left sibling: its last child 99 arrives in front,
        // with the pulled-down separator 5 keying the old head.
        Internal::insert_front(&mut page, 99, &5);
        assert_eq!(header::size(&page), 3);
        assert_eq!(Internal::value_at(&page, 0), 99);
        assert_eq!(Internal::key_at(&page, 1), 5);
        assert_eq!(Internal::value_at(&page, 1), 100);
        assert_eq!(Internal::key_at(&page, 2), 10);

        Internal::push_back(&mut page, &30, 102);
        assert_eq!(Internal::lookup(&page, &35), 102);
    }
}
