use crate::access::tuple::TupleId;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::error::EngineError;
use crate::storage::page::heap_page::{HeapPage, HeapPageRef, MAX_TUPLE_SIZE};
use crate::storage::page::PageId;
use anyhow::Result;

/// A table spanning a singly linked chain of heap pages.
pub struct TableHeap {
    buffer_pool: BufferPoolManager,
    first_page_id: PageId,
}

impl TableHeap {
    /// Create an empty table with its first page allocated up front.
    pub fn create(buffer_pool: BufferPoolManager) -> Result<Self> {
        let (first_page_id, mut guard) = buffer_pool.new_page()?;
        HeapPage::new(&mut guard, first_page_id);
        drop(guard);
        Ok(Self {
            buffer_pool,
            first_page_id,
        })
    }

    pub fn open(buffer_pool: BufferPoolManager, first_page_id: PageId) -> Self {
        Self {
            buffer_pool,
            first_page_id,
        }
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Insert a tuple, walking the page chain and appending a page when
    /// every existing one is full.
    pub fn insert(&self, data: &[u8]) -> Result<TupleId> {
        if data.len() > MAX_TUPLE_SIZE {
            return Err(EngineError::TupleTooLarge {
                size: data.len(),
                max: MAX_TUPLE_SIZE,
            }
            .into());
        }

        let required_space = HeapPage::required_space_for(data.len());
        let mut current_page_id = self.first_page_id;

        loop {
            let mut guard = self.buffer_pool.fetch_page_write(current_page_id)?;
            let mut heap_page = HeapPage::from_data(&mut guard);

            if heap_page.free_space() >= required_space {
                let slot_id = heap_page.insert_tuple(data)?;
                return Ok(TupleId::new(current_page_id, slot_id));
            }

            let next_page_id = heap_page.next_page_id();
            if next_page_id.is_valid() {
                current_page_id = next_page_id;
                continue;
            }

            // End of the chain: append a page and link it in.
            let (new_page_id, mut new_guard) = self.buffer_pool.new_page()?;
            let mut new_heap_page = HeapPage::new(&mut new_guard, new_page_id);
            let slot_id = new_heap_page.insert_tuple(data)?;
            heap_page.set_next_page_id(new_page_id);
            return Ok(TupleId::new(new_page_id, slot_id));
        }
    }

    /// Fetch a tuple's payload; None when the slot is absent or deleted.
    pub fn get(&self, tuple_id: TupleId) -> Result<Option<Vec<u8>>> {
        let guard = self.buffer_pool.fetch_page(tuple_id.page_id)?;
        let heap_page = HeapPageRef::new(&guard);
        match heap_page.get_tuple(tuple_id.slot_id) {
            Ok(data) => Ok(Some(data.to_vec())),
            Err(EngineError::TupleNotFound { .. }) | Err(EngineError::InvalidSlotId { .. }) => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Mark a tuple deleted. Returns false when it was already gone.
    pub fn mark_delete(&self, tuple_id: TupleId) -> Result<bool> {
        let mut guard = self.buffer_pool.fetch_page_write(tuple_id.page_id)?;
        let mut heap_page = HeapPage::from_data(&mut guard);
        match heap_page.delete_tuple(tuple_id.slot_id) {
            Ok(()) => Ok(true),
            Err(EngineError::TupleNotFound { .. }) | Err(EngineError::InvalidSlotId { .. }) => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite a tuple without moving it. Returns false when the new
    /// payload does not fit in the old slot; the caller falls back to
    /// mark-delete plus insert.
    pub fn update_in_place(&self, tuple_id: TupleId, data: &[u8]) -> Result<bool> {
        let mut guard = self.buffer_pool.fetch_page_write(tuple_id.page_id)?;
        let mut heap_page = HeapPage::from_data(&mut guard);
        match heap_page.update_tuple_in_place(tuple_id.slot_id, data) {
            Ok(fits) => Ok(fits),
            Err(EngineError::TupleNotFound { .. }) | Err(EngineError::InvalidSlotId { .. }) => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn iter(&self) -> TableIterator {
        TableIterator {
            buffer_pool: self.buffer_pool.clone(),
            current_page_id: self.first_page_id,
            current_slot: 0,
            exhausted: false,
        }
    }
}

/// Sequential cursor over every live tuple of a table.
pub struct TableIterator {
    buffer_pool: BufferPoolManager,
    current_page_id: PageId,
    current_slot: u16,
    exhausted: bool,
}

impl TableIterator {
    /// Advance to the next live tuple, skipping deleted slots and hopping
    /// the page chain.
    pub fn next(&mut self) -> Result<Option<(TupleId, Vec<u8>)>> {
        while !self.exhausted {
            let guard = self.buffer_pool.fetch_page(self.current_page_id)?;
            let heap_page = HeapPageRef::new(&guard);
            let tuple_count = heap_page.tuple_count();

            while self.current_slot < tuple_count {
                let slot_id = self.current_slot;
                self.current_slot += 1;
                match heap_page.get_tuple(slot_id) {
                    Ok(data) => {
                        let tuple_id = TupleId::new(self.current_page_id, slot_id);
                        return Ok(Some((tuple_id, data.to_vec())));
                    }
                    Err(EngineError::TupleNotFound { .. }) => continue,
                    Err(e) => return Err(e.into()),
                }
            }

            let next_page_id = heap_page.next_page_id();
            if next_page_id.is_valid() {
                self.current_page_id = next_page_id;
                self.current_slot = 0;
            } else {
                self.exhausted = true;
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::value::{serialize_values, Value};
    use crate::storage::buffer::lru::LruReplacer;
    use crate::storage::PageManager;
    use tempfile::tempdir;

    fn create_heap() -> Result<(TableHeap, tempfile::TempDir)> {
        let dir = tempdir()?;
        let page_manager = PageManager::create(&dir.path().join("test.db"))?;
        let replacer = Box::new(LruReplacer::new(16));
        let buffer_pool = BufferPoolManager::new(page_manager, replacer, 16);
        let heap = TableHeap::create(buffer_pool)?;
        Ok((heap, dir))
    }

    fn row(id: i32) -> Vec<u8> {
        serialize_values(&[Value::Int32(id), Value::String(format!("row-{id}"))]).unwrap()
    }

    #[test]
    fn test_insert_and_get() -> Result<()> {
        let (heap, _dir) = create_heap()?;

        let tid = heap.insert(&row(1))?;
        assert_eq!(heap.get(tid)?, Some(row(1)));
        assert_eq!(heap.get(TupleId::new(tid.page_id, 99))?, None);

        Ok(())
    }

    #[test]
    fn test_mark_delete() -> Result<()> {
        let (heap, _dir) = create_heap()?;

        let tid = heap.insert(&row(1))?;
        assert!(heap.mark_delete(tid)?);
        assert_eq!(heap.get(tid)?, None);
        assert!(!heap.mark_delete(tid)?);

        Ok(())
    }

    #[test]
    fn test_update_in_place_and_fallback() -> Result<()> {
        let (heap, _dir) = create_heap()?;

        let tid = heap.insert(&row(1))?;
        let same_size = row(2);
        assert!(heap.update_in_place(tid, &same_size)?);
        assert_eq!(heap.get(tid)?, Some(same_size));

        let bigger = serialize_values(&[
            Value::Int32(2),
            Value::String("a much longer payload than before".into()),
        ])?;
        assert!(!heap.update_in_place(tid, &bigger)?);

        Ok(())
    }

    #[test]
    fn test_iterator_spans_pages() -> Result<()> {
        let (heap, _dir) = create_heap()?;

        // Enough rows to overflow the first page.
        let padding = "p".repeat(500);
        let mut inserted = Vec::new();
        for i in 0..50 {
            let data = serialize_values(&[Value::Int32(i), Value::String(padding.clone())])?;
            inserted.push(heap.insert(&data)?);
        }
        assert!(inserted.iter().any(|t| t.page_id != heap.first_page_id()));

        let mut iter = heap.iter();
        let mut seen = Vec::new();
        while let Some((tid, _)) = iter.next()? {
            seen.push(tid);
        }
        assert_eq!(seen, inserted);

        Ok(())
    }

    #[test]
    fn test_iterator_skips_deleted() -> Result<()> {
        let (heap, _dir) = create_heap()?;

        let t1 = heap.insert(&row(1))?;
        let t2 = heap.insert(&row(2))?;
        let t3 = heap.insert(&row(3))?;
        heap.mark_delete(t2)?;

        let mut iter = heap.iter();
        let mut seen = Vec::new();
        while let Some((tid, _)) = iter.next()? {
            seen.push(tid);
        }
        assert_eq!(seen, vec![t1, t3]);

        Ok(())
    }

    #[test]
    fn test_oversized_tuple_is_typed_error() -> Result<()> {
        let (heap, _dir) = create_heap()?;

        let huge = vec![0u8; MAX_TUPLE_SIZE + 1];
        let err = heap.insert(&huge).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::TupleTooLarge { .. })
        ));

        Ok(())
    }
}
