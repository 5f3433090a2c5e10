use byteorder::{ByteOrder, LittleEndian};

use crate::common::config::PAGE_SIZE;
use crate::common::types::{Page, PageId, Tuple, INVALID_PAGE_ID};
use crate::storage::page::error::PageError;

/// Slotted tuple page.
///
/// Layout: a fixed header, tuple data growing upward from the header, and a
/// slot array growing downward from the page tail. Each slot is
/// `{offset:u32, length:u32}`; the length's high bit is the mark-delete
/// tombstone. A zeroed slot is free and may be re-occupied by undo's
/// exact-slot reinsert. Deleted tuple bytes are not compacted; the space is
/// reclaimed when the page is reinitialized.
pub struct TuplePage;

const NEXT_PAGE_OFFSET: usize = 0;
const PREV_PAGE_OFFSET: usize = 4;
const SLOT_COUNT_OFFSET: usize = 8;
const FREE_SPACE_OFFSET: usize = 12;
// Bytes [16, 20) reserved; [20, 28) hold the page LSN (see PAGE_LSN_OFFSET).
const HEADER_SIZE: usize = 28;

const SLOT_SIZE: usize = 8;
const TOMBSTONE: u32 = 0x8000_0000;

/// Largest tuple that fits an empty page
pub const MAX_TUPLE_SIZE: usize = PAGE_SIZE - HEADER_SIZE - SLOT_SIZE;

#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: u32,
    length: u32,
}

impl Slot {
    fn is_free(&self) -> bool {
        self.offset == 0 && self.length == 0
    }

    fn is_marked(&self) -> bool {
        self.length & TOMBSTONE != 0
    }

    fn data_len(&self) -> usize {
        (self.length & !TOMBSTONE) as usize
    }
}

impl TuplePage {
    /// Initialize (or reinitialize) a page as an empty tuple page
    pub fn init(page: &mut Page, page_id: PageId, prev_page_id: PageId) {
        page.data.fill(0);
        page.page_id = page_id;
        LittleEndian::write_u32(&mut page.data[NEXT_PAGE_OFFSET..], INVALID_PAGE_ID);
        LittleEndian::write_u32(&mut page.data[PREV_PAGE_OFFSET..], prev_page_id);
        LittleEndian::write_u32(&mut page.data[SLOT_COUNT_OFFSET..], 0);
        LittleEndian::write_u32(&mut page.data[FREE_SPACE_OFFSET..], HEADER_SIZE as u32);
    }

    pub fn next_page_id(page: &Page) -> PageId {
        LittleEndian::read_u32(&page.data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4])
    }

    pub fn set_next_page_id(page: &mut Page, next: PageId) {
        LittleEndian::write_u32(&mut page.data[NEXT_PAGE_OFFSET..], next);
    }

    pub fn prev_page_id(page: &Page) -> PageId {
        LittleEndian::read_u32(&page.data[PREV_PAGE_OFFSET..PREV_PAGE_OFFSET + 4])
    }

    pub fn slot_count(page: &Page) -> u32 {
        LittleEndian::read_u32(&page.data[SLOT_COUNT_OFFSET..SLOT_COUNT_OFFSET + 4])
    }

    /// Number of live (present, unmarked) tuples
    pub fn tuple_count(page: &Page) -> u32 {
        (0..Self::slot_count(page))
            .filter(|&i| {
                let slot = Self::slot(page, i);
                !slot.is_free() && !slot.is_marked()
            })
            .count() as u32
    }

    /// Insert a tuple into the first free slot, or a new one
    pub fn insert_tuple(page: &mut Page, tuple: &Tuple) -> Result<u32, PageError> {
        let slot_count = Self::slot_count(page);
        let target = (0..slot_count)
            .find(|&i| Self::slot(page, i).is_free())
            .unwrap_or(slot_count);
        Self::insert_tuple_at(page, tuple, target)?;
        Ok(target)
    }

    /// Insert a tuple into a specific slot. The slot must be free; recovery
    /// and rollback use this to put a tuple back at its original RID.
    pub fn insert_tuple_at(page: &mut Page, tuple: &Tuple, slot_idx: u32) -> Result<(), PageError> {
        let slot_count = Self::slot_count(page);
        if slot_idx < slot_count && !Self::slot(page, slot_idx).is_free() {
            return Err(PageError::SlotOccupied(slot_idx));
        }

        let new_slot_count = slot_count.max(slot_idx + 1);
        let free_offset = Self::free_space_offset(page);
        let slot_area = PAGE_SIZE - SLOT_SIZE * new_slot_count as usize;
        if free_offset as usize + tuple.len() > slot_area {
            return Err(PageError::InsufficientSpace);
        }

        let start = free_offset as usize;
        page.data[start..start + tuple.len()].copy_from_slice(tuple.data());
        Self::write_slot(
            page,
            slot_idx,
            Slot {
                offset: free_offset,
                length: tuple.len() as u32,
            },
        );
        LittleEndian::write_u32(&mut page.data[SLOT_COUNT_OFFSET..], new_slot_count);
        LittleEndian::write_u32(
            &mut page.data[FREE_SPACE_OFFSET..],
            free_offset + tuple.len() as u32,
        );
        Ok(())
    }

    /// Read a live tuple
    pub fn get_tuple(page: &Page, slot_idx: u32) -> Result<Tuple, PageError> {
        let slot = Self::checked_slot(page, slot_idx)?;
        if slot.is_free() || slot.is_marked() {
            return Err(PageError::TupleNotFound);
        }
        Ok(Self::tuple_at(page, slot))
    }

    /// Overwrite a tuple in place, returning the old image
    pub fn update_tuple(
        page: &mut Page,
        new_tuple: &Tuple,
        slot_idx: u32,
    ) -> Result<Tuple, PageError> {
        let slot = Self::checked_slot(page, slot_idx)?;
        if slot.is_free() || slot.is_marked() {
            return Err(PageError::TupleNotFound);
        }
        let old = Self::tuple_at(page, slot);

        if new_tuple.len() <= slot.data_len() {
            let start = slot.offset as usize;
            page.data[start..start + new_tuple.len()].copy_from_slice(new_tuple.data());
            Self::write_slot(
                page,
                slot_idx,
                Slot {
                    offset: slot.offset,
                    length: new_tuple.len() as u32,
                },
            );
        } else {
            // Grown tuple: relocate to the free area, orphaning the old bytes.
            let free_offset = Self::free_space_offset(page);
            let slot_area = PAGE_SIZE - SLOT_SIZE * Self::slot_count(page) as usize;
            if free_offset as usize + new_tuple.len() > slot_area {
                return Err(PageError::InsufficientSpace);
            }
            let start = free_offset as usize;
            page.data[start..start + new_tuple.len()].copy_from_slice(new_tuple.data());
            Self::write_slot(
                page,
                slot_idx,
                Slot {
                    offset: free_offset,
                    length: new_tuple.len() as u32,
                },
            );
            LittleEndian::write_u32(
                &mut page.data[FREE_SPACE_OFFSET..],
                free_offset + new_tuple.len() as u32,
            );
        }
        Ok(old)
    }

    /// Set the tombstone bit, returning the tuple image
    pub fn mark_delete(page: &mut Page, slot_idx: u32) -> Result<Tuple, PageError> {
        let slot = Self::checked_slot(page, slot_idx)?;
        if slot.is_free() || slot.is_marked() {
            return Err(PageError::TupleNotFound);
        }
        let image = Self::tuple_at(page, slot);
        Self::write_slot(
            page,
            slot_idx,
            Slot {
                offset: slot.offset,
                length: slot.length | TOMBSTONE,
            },
        );
        Ok(image)
    }

    /// Physically remove a tuple (marked or not), freeing its slot
    pub fn apply_delete(page: &mut Page, slot_idx: u32) -> Result<Tuple, PageError> {
        let slot = Self::checked_slot(page, slot_idx)?;
        if slot.is_free() {
            return Err(PageError::TupleNotFound);
        }
        let image = Self::tuple_at(page, slot);
        Self::write_slot(
            page,
            slot_idx,
            Slot {
                offset: 0,
                length: 0,
            },
        );
        Ok(image)
    }

    /// Clear the tombstone bit set by `mark_delete`
    pub fn rollback_delete(page: &mut Page, slot_idx: u32) -> Result<(), PageError> {
        let slot = Self::checked_slot(page, slot_idx)?;
        if slot.is_free() || !slot.is_marked() {
            return Err(PageError::TupleNotFound);
        }
        Self::write_slot(
            page,
            slot_idx,
            Slot {
                offset: slot.offset,
                length: slot.length & !TOMBSTONE,
            },
        );
        Ok(())
    }

    fn free_space_offset(page: &Page) -> u32 {
        LittleEndian::read_u32(&page.data[FREE_SPACE_OFFSET..FREE_SPACE_OFFSET + 4])
    }

    fn slot_pos(slot_idx: u32) -> usize {
        PAGE_SIZE - SLOT_SIZE * (slot_idx as usize + 1)
    }

    fn slot(page: &Page, slot_idx: u32) -> Slot {
        let pos = Self::slot_pos(slot_idx);
        Slot {
            offset: LittleEndian::read_u32(&page.data[pos..pos + 4]),
            length: LittleEndian::read_u32(&page.data[pos + 4..pos + 8]),
        }
    }

    fn checked_slot(page: &Page, slot_idx: u32) -> Result<Slot, PageError> {
        if slot_idx >= Self::slot_count(page) {
            return Err(PageError::InvalidSlot(slot_idx));
        }
        Ok(Self::slot(page, slot_idx))
    }

    fn write_slot(page: &mut Page, slot_idx: u32, slot: Slot) {
        let pos = Self::slot_pos(slot_idx);
        LittleEndian::write_u32(&mut page.data[pos..pos + 4], slot.offset);
        LittleEndian::write_u32(&mut page.data[pos + 4..pos + 8], slot.length);
    }

    fn tuple_at(page: &Page, slot: Slot) -> Tuple {
        let start = slot.offset as usize;
        Tuple::from_slice(&page.data[start..start + slot.data_len()])
    }
}
