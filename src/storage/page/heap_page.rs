//! Slotted heap page, PostgreSQL style: a slot array growing down from
//! the header and tuple data growing up from the page end. Deletes mark
//! the slot; space is not compacted.

use crate::storage::error::{EngineError, EngineResult};
use crate::storage::page::{PageId, INVALID_PAGE_ID};
use crate::storage::PAGE_SIZE;

const HEADER_SIZE: usize = 20;
const PAGE_ID_OFFSET: usize = 0;
const LOWER_OFFSET: usize = 12;
const UPPER_OFFSET: usize = 14;
const NEXT_PAGE_OFFSET: usize = 16;

const SLOT_SIZE: usize = 4;

/// Largest tuple a single heap page can hold.
pub const MAX_TUPLE_SIZE: usize = PAGE_SIZE - HEADER_SIZE - SLOT_SIZE;

pub struct HeapPage<'a> {
    data: &'a mut [u8; PAGE_SIZE],
}

impl<'a> HeapPage<'a> {
    pub fn new(data: &'a mut [u8; PAGE_SIZE], page_id: PageId) -> Self {
        data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4].copy_from_slice(&page_id.0.to_le_bytes());

        let lower = HEADER_SIZE as u16;
        data[LOWER_OFFSET..LOWER_OFFSET + 2].copy_from_slice(&lower.to_le_bytes());

        let upper = PAGE_SIZE as u16;
        data[UPPER_OFFSET..UPPER_OFFSET + 2].copy_from_slice(&upper.to_le_bytes());

        data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4]
            .copy_from_slice(&INVALID_PAGE_ID.0.to_le_bytes());

        Self { data }
    }

    pub fn from_data(data: &'a mut [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }

    pub fn insert_tuple(&mut self, tuple_data: &[u8]) -> EngineResult<u16> {
        let tuple_size = tuple_data.len();
        if tuple_size > MAX_TUPLE_SIZE {
            return Err(EngineError::TupleTooLarge {
                size: tuple_size,
                max: MAX_TUPLE_SIZE,
            });
        }

        let lower = self.get_lower();
        let upper = self.get_upper();
        let tuple_count = self.tuple_count();

        let required_space = tuple_size + SLOT_SIZE;
        let available_space = (upper - lower) as usize;
        if available_space < required_space {
            return Err(EngineError::PageFull {
                required: required_space,
                available: available_space,
            });
        }

        // Tuple data grows up from the page end.
        let new_upper = upper - tuple_size as u16;
        self.data[new_upper as usize..upper as usize].copy_from_slice(tuple_data);

        // Slot entry grows down from the header.
        let slot_offset = lower as usize;
        self.data[slot_offset..slot_offset + 2].copy_from_slice(&new_upper.to_le_bytes());
        self.data[slot_offset + 2..slot_offset + 4]
            .copy_from_slice(&(tuple_size as u16).to_le_bytes());

        self.set_lower(lower + SLOT_SIZE as u16);
        self.set_upper(new_upper);

        Ok(tuple_count)
    }

    pub fn get_tuple(&self, slot_id: u16) -> EngineResult<&[u8]> {
        let (offset, length) = self.slot(slot_id)?;
        if offset == 0 && length == 0 {
            return Err(EngineError::TupleNotFound { slot_id });
        }
        Ok(&self.data[offset as usize..(offset + length) as usize])
    }

    /// Mark a tuple deleted by zeroing its slot.
    pub fn delete_tuple(&mut self, slot_id: u16) -> EngineResult<()> {
        let (offset, length) = self.slot(slot_id)?;
        if offset == 0 && length == 0 {
            return Err(EngineError::TupleNotFound { slot_id });
        }
        let slot_offset = HEADER_SIZE + (slot_id as usize * SLOT_SIZE);
        self.data[slot_offset..slot_offset + 4].fill(0);
        Ok(())
    }

    /// Overwrite a tuple in place if the new payload fits in its slot.
    /// Returns false (leaving the page untouched) when it does not.
    pub fn update_tuple_in_place(&mut self, slot_id: u16, tuple_data: &[u8]) -> EngineResult<bool> {
        let (offset, length) = self.slot(slot_id)?;
        if offset == 0 && length == 0 {
            return Err(EngineError::TupleNotFound { slot_id });
        }
        if tuple_data.len() > length as usize {
            return Ok(false);
        }
        self.data[offset as usize..offset as usize + tuple_data.len()].copy_from_slice(tuple_data);
        let slot_offset = HEADER_SIZE + (slot_id as usize * SLOT_SIZE);
        self.data[slot_offset + 2..slot_offset + 4]
            .copy_from_slice(&(tuple_data.len() as u16).to_le_bytes());
        Ok(true)
    }

    pub fn tuple_count(&self) -> u16 {
        ((self.get_lower() as usize - HEADER_SIZE) / SLOT_SIZE) as u16
    }

    pub fn free_space(&self) -> usize {
        (self.get_upper() - self.get_lower()) as usize
    }

    pub fn required_space_for(tuple_size: usize) -> usize {
        tuple_size + SLOT_SIZE
    }

    pub fn next_page_id(&self) -> PageId {
        let id = u32::from_le_bytes([
            self.data[NEXT_PAGE_OFFSET],
            self.data[NEXT_PAGE_OFFSET + 1],
            self.data[NEXT_PAGE_OFFSET + 2],
            self.data[NEXT_PAGE_OFFSET + 3],
        ]);
        PageId(id)
    }

    pub fn set_next_page_id(&mut self, next: PageId) {
        self.data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4].copy_from_slice(&next.0.to_le_bytes());
    }

    fn slot(&self, slot_id: u16) -> EngineResult<(u16, u16)> {
        let tuple_count = self.tuple_count();
        if slot_id >= tuple_count {
            return Err(EngineError::InvalidSlotId {
                slot_id,
                max_slot: tuple_count.saturating_sub(1),
            });
        }
        let slot_offset = HEADER_SIZE + (slot_id as usize * SLOT_SIZE);
        let offset = u16::from_le_bytes([self.data[slot_offset], self.data[slot_offset + 1]]);
        let length = u16::from_le_bytes([self.data[slot_offset + 2], self.data[slot_offset + 3]]);
        Ok((offset, length))
    }

    fn get_lower(&self) -> u16 {
        u16::from_le_bytes([self.data[LOWER_OFFSET], self.data[LOWER_OFFSET + 1]])
    }

    fn set_lower(&mut self, lower: u16) {
        self.data[LOWER_OFFSET..LOWER_OFFSET + 2].copy_from_slice(&lower.to_le_bytes());
    }

    fn get_upper(&self) -> u16 {
        u16::from_le_bytes([self.data[UPPER_OFFSET], self.data[UPPER_OFFSET + 1]])
    }

    fn set_upper(&mut self, upper: u16) {
        self.data[UPPER_OFFSET..UPPER_OFFSET + 2].copy_from_slice(&upper.to_le_bytes());
    }
}

/// Read-only view over a shared-latched heap page.
pub struct HeapPageRef<'a> {
    data: &'a [u8; PAGE_SIZE],
}

impl<'a> HeapPageRef<'a> {
    pub fn new(data: &'a [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }

    pub fn get_tuple(&self, slot_id: u16) -> EngineResult<&[u8]> {
        let tuple_count = self.tuple_count();
        if slot_id >= tuple_count {
            return Err(EngineError::InvalidSlotId {
                slot_id,
                max_slot: tuple_count.saturating_sub(1),
            });
        }
        let slot_offset = HEADER_SIZE + (slot_id as usize * SLOT_SIZE);
        let offset = u16::from_le_bytes([self.data[slot_offset], self.data[slot_offset + 1]]);
        let length = u16::from_le_bytes([self.data[slot_offset + 2], self.data[slot_offset + 3]]);
        if offset == 0 && length == 0 {
            return Err(EngineError::TupleNotFound { slot_id });
        }
        Ok(&self.data[offset as usize..(offset + length) as usize])
    }

    pub fn tuple_count(&self) -> u16 {
        let lower = u16::from_le_bytes([self.data[LOWER_OFFSET], self.data[LOWER_OFFSET + 1]]);
        ((lower as usize - HEADER_SIZE) / SLOT_SIZE) as u16
    }

    pub fn next_page_id(&self) -> PageId {
        let id = u32::from_le_bytes([
            self.data[NEXT_PAGE_OFFSET],
            self.data[NEXT_PAGE_OFFSET + 1],
            self.data[NEXT_PAGE_OFFSET + 2],
            self.data[NEXT_PAGE_OFFSET + 3],
        ]);
        PageId(id)
    }
}
