use std::marker::PhantomData;

use byteorder::{ByteOrder, LittleEndian};

use crate::common::config::PAGE_SIZE;
use crate::common::types::{Page, PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::{self as header, BTreePageType, BTREE_PAGE_HEADER_SIZE};

const NEXT_PAGE_OFFSET: usize = BTREE_PAGE_HEADER_SIZE;
/// Leaf pages extend the common header with `next_page_id:u32`
pub const LEAF_PAGE_HEADER_SIZE: usize = BTREE_PAGE_HEADER_SIZE + 4;

/// Codec for leaf pages: a sorted array of `(key, rid)` entries plus the
/// sibling link that threads all leaves left to right.
pub struct LeafPage<K>(PhantomData<K>);

impl<K: IndexKey> LeafPage<K> {
    const ENTRY_SIZE: usize = K::ENCODED_LEN + 8;

    /// Largest max_size the page geometry supports, minus the one-slot
    /// headroom that lets an insert overflow before the split.
    pub fn default_max_size() -> i32 {
        ((PAGE_SIZE - LEAF_PAGE_HEADER_SIZE) / Self::ENTRY_SIZE) as i32 - 1
    }

    pub fn init(page: &mut Page, page_id: PageId, parent_id: PageId, max_size: i32) {
        debug_assert!((2..=Self::default_max_size()).contains(&max_size));
        header::set_page_type(page, BTreePageType::Leaf);
        header::set_page_id(page, page_id);
        header::set_parent_page_id(page, parent_id);
        header::set_size(page, 0);
        header::set_max_size(page, max_size);
        Self::set_next_page_id(page, INVALID_PAGE_ID);
        page.page_id = page_id;
    }

    pub fn min_size(page: &Page) -> i32 {
        header::max_size(page) / 2
    }

    pub fn next_page_id(page: &Page) -> PageId {
        LittleEndian::read_u32(&page.data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4])
    }

    pub fn set_next_page_id(page: &mut Page, next: PageId) {
        LittleEndian::write_u32(&mut page.data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4], next);
    }

    pub fn key_at(page: &Page, index: i32) -> K {
        let off = Self::entry_offset(index);
        K::decode(&page.data[off..off + K::ENCODED_LEN])
    }

    pub fn rid_at(page: &Page, index: i32) -> Rid {
        let off = Self::entry_offset(index) + K::ENCODED_LEN;
        Rid::new(
            LittleEndian::read_u32(&page.data[off..off + 4]),
            LittleEndian::read_u32(&page.data[off + 4..off + 8]),
        )
    }

    /// First index whose key is >= the probe, i.e. the binary-search
    /// insertion point.
    pub fn key_index(page: &Page, key: &K) -> i32 {
        let mut lo = 0i32;
        let mut hi = header::size(page) - 1;
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            if Self::key_at(page, mid) >= *key {
                hi = mid - 1;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }

    pub fn lookup(page: &Page, key: &K) -> Option<Rid> {
        let index = Self::key_index(page, key);
        if index < header::size(page) && Self::key_at(page, index) == *key {
            Some(Self::rid_at(page, index))
        } else {
            None
        }
    }

    /// Insert in sorted position; returns the size after insertion. The
    /// caller splits when this exceeds max_size.
    pub fn insert(page: &mut Page, key: &K, rid: Rid) -> i32 {
        let index = Self::key_index(page, key);
        let size = header::size(page);
        Self::shift_right(page, index, size);
        Self::write_entry(page, index, key, rid);
        header::set_size(page, size + 1);
        size + 1
    }

    /// Remove the key if present; returns the size after the operation
    pub fn remove(page: &mut Page, key: &K) -> i32 {
        let size = header::size(page);
        let index = Self::key_index(page, key);
        if index >= size || Self::key_at(page, index) != *key {
            return size;
        }
        Self::shift_left(page, index, size);
        header::set_size(page, size - 1);
        size - 1
    }

    pub fn remove_at(page: &mut Page, index: i32) -> (K, Rid) {
        let size = header::size(page);
        debug_assert!(index >= 0 && index < size);
        let entry = (Self::key_at(page, index), Self::rid_at(page, index));
        Self::shift_left(page, index, size);
        header::set_size(page, size - 1);
        entry
    }

    pub fn push_back(page: &mut Page, key: &K, rid: Rid) {
        let size = header::size(page);
        Self::write_entry(page, size, key, rid);
        header::set_size(page, size + 1);
    }

    pub fn insert_front(page: &mut Page, key: &K, rid: Rid) {
        let size = header::size(page);
        Self::shift_right(page, 0, size);
        Self::write_entry(page, 0, key, rid);
        header::set_size(page, size + 1);
    }

    /// Split: move the upper half of this (overflowed) page into the fresh
    /// `recipient` and splice it into the leaf chain.
    pub fn move_half_to(page: &mut Page, recipient: &mut Page) {
        let total = header::size(page);
        debug_assert_eq!(total, header::max_size(page) + 1);
        let copy_index = total / 2;

        let src = Self::entry_offset(copy_index)..Self::entry_offset(total);
        let dst = Self::entry_offset(0);
        let len = src.len();
        recipient.data[dst..dst + len].copy_from_slice(&page.data[src]);

        recipient.data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4]
            .copy_from_slice(&page.data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4]);
        let recipient_id = header::page_id(recipient);
        Self::set_next_page_id(page, recipient_id);

        header::set_size(page, copy_index);
        header::set_size(recipient, total - copy_index);
    }

    /// Coalesce: move everything into the left-hand `recipient` and unlink
    /// this page from the chain.
    pub fn move_all_to(page: &mut Page, recipient: &mut Page) {
        let size = header::size(page);
        let start = header::size(recipient);

        let src = Self::entry_offset(0)..Self::entry_offset(size);
        let dst = Self::entry_offset(start);
        let len = src.len();
        recipient.data[dst..dst + len].copy_from_slice(&page.data[src]);

        recipient.data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4]
            .copy_from_slice(&page.data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4]);
        header::set_size(recipient, start + size);
        header::set_size(page, 0);
    }

    fn entry_offset(index: i32) -> usize {
        LEAF_PAGE_HEADER_SIZE + index as usize * Self::ENTRY_SIZE
    }

    fn write_entry(page: &mut Page, index: i32, key: &K, rid: Rid) {
        let off = Self::entry_offset(index);
        key.encode(&mut page.data[off..off + K::ENCODED_LEN]);
        let off = off + K::ENCODED_LEN;
        LittleEndian::write_u32(&mut page.data[off..off + 4], rid.page_id);
        LittleEndian::write_u32(&mut page.data[off + 4..off + 8], rid.slot);
    }

    /// Open a gap at `index` (entries [index, size) move one slot right)
    fn shift_right(page: &mut Page, index: i32, size: i32) {
        if index < size {
            page.data.copy_within(
                Self::entry_offset(index)..Self::entry_offset(size),
                Self::entry_offset(index + 1),
            );
        }
    }

    /// Close the gap at `index` (entries (index, size) move one slot left)
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

    type Leaf = LeafPage<i64>;

    fn leaf_with(keys: &[i64]) -> Page {
        let mut page = Page::new(3);
        Leaf::init(&mut page, 3, INVALID_PAGE_ID, 8);
        for &k in keys {
            Leaf::insert(&mut page, &k, Rid::new(1, k as u32));
        }
        page
    }

    #[test]
    fn test_sorted_insert_and_lookup() {
        let page = leaf_with(&[5, 1, 3, 9, 7]);
        let keys: Vec<i64> = (0..header::size(&page))
            .map(|i| Leaf::key_at(&page, i))
            .collect();
        assert_eq!(keys, vec![1, 3, 5, 7, 9]);

        assert_eq!(Leaf::lookup(&page, &7), Some(Rid::new(1, 7)));
        assert_eq!(Leaf::lookup(&page, &4), None);
    }

    #[test]
    fn test_key_index_boundaries() {
        let page = leaf_with(&[10, 20, 30]);
        assert_eq!(Leaf::key_index(&page, &5), 0);
        assert_eq!(Leaf::key_index(&page, &10), 0);
        assert_eq!(Leaf::key_index(&page, &15), 1);
        assert_eq!(Leaf::key_index(&page, &30), 2);
        assert_eq!(Leaf::key_index(&page, &35), 3);
    }

    #[test]
    fn test_remove() {
        let mut page = leaf_with(&[1, 2, 3]);
        assert_eq!(Leaf::remove(&mut page, &2), 2);
        assert_eq!(Leaf::lookup(&page, &2), None);
        assert_eq!(Leaf::lookup(&page, &3), Some(Rid::new(1, 3)));
        // Removing a missing key leaves the size alone.
        assert_eq!(Leaf::remove(&mut page, &42), 2);
    }

    #[test]
    fn test_split_moves_upper_half() {
        let mut page = Page::new(3);
        Leaf::init(&mut page, 3, INVALID_PAGE_ID, 4);
        for k in [1i64, 2, 3, 4, 5] {
            Leaf::insert(&mut page, &k, Rid::new(1, k as u32));
        }
        assert_eq!(header::size(&page), 5); // max_size + 1: time to split

        let mut recipient = Page::new(9);
        Leaf::init(&mut recipient, 9, INVALID_PAGE_ID, 4);
        Leaf::move_half_to(&mut page, &mut recipient);

        assert_eq!(header::size(&page), 2);
        assert_eq!(header::size(&recipient), 3);
        assert_eq!(Leaf::key_at(&recipient, 0), 3);
        assert_eq!(Leaf::next_page_id(&page), 9);
        assert_eq!(Leaf::next_page_id(&recipient), INVALID_PAGE_ID);
    }

    #[test]
    fn test_coalesce_appends_and_relinks() {
        let mut left = leaf_with(&[1, 2]);
        let mut right = Page::new(4);
        Leaf::init(&mut right, 4, INVALID_PAGE_ID, 8);
        for k in [5i64, 6] {
            Leaf::insert(&mut right, &k, Rid::new(1, k as u32));
        }
        Leaf::set_next_page_id(&mut left, 4);
        Leaf::set_next_page_id(&mut right, 77);

        Leaf::move_all_to(&mut right, &mut left);
        assert_eq!(header::size(&left), 4);
        assert_eq!(header::size(&right), 0);
        assert_eq!(Leaf::next_page_id(&left), 77);
        let keys: Vec<i64> = (0..4).map(|i| Leaf::key_at(&left, i)).collect();
        assert_eq!(keys, vec![1, 2, 5, 6]);
    }
}
