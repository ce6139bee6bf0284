//! The header page (page id 0): a persistent map from index name to root
//! page id, updated under the header page's exclusive latch whenever a
//! root changes.

use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::{PageId, HEADER_PAGE_ID};
use anyhow::{bail, Result};

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;

const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;

const MAX_RECORDS: usize = (crate::storage::PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// View over the latched header page bytes.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    pub fn init(data: &'a mut [u8]) -> Self {
        data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4].copy_from_slice(&0u32.to_le_bytes());
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        u32::from_le_bytes([
            self.data[RECORD_COUNT_OFFSET],
            self.data[RECORD_COUNT_OFFSET + 1],
            self.data[RECORD_COUNT_OFFSET + 2],
            self.data[RECORD_COUNT_OFFSET + 3],
        ]) as usize
    }

    fn set_record_count(&mut self, count: usize) {
        self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .copy_from_slice(&(count as u32).to_le_bytes());
    }

    fn name_at(&self, index: usize) -> &[u8] {
        let offset = RECORDS_OFFSET + index * RECORD_SIZE;
        let name = &self.data[offset..offset + NAME_SIZE];
        let end = name.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
        &name[..end]
    }

    fn root_at(&self, index: usize) -> PageId {
        let offset = RECORDS_OFFSET + index * RECORD_SIZE + NAME_SIZE;
        PageId(u32::from_le_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ]))
    }

    fn set_root_at(&mut self, index: usize, root: PageId) {
        let offset = RECORDS_OFFSET + index * RECORD_SIZE + NAME_SIZE;
        self.data[offset..offset + 4].copy_from_slice(&root.0.to_le_bytes());
    }

    fn find(&self, name: &str) -> Option<usize> {
        (0..self.record_count()).find(|&i| self.name_at(i) == name.as_bytes())
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.find(name).map(|i| self.root_at(i))
    }

    /// Add a record; false if the name already exists.
    pub fn insert_record(&mut self, name: &str, root: PageId) -> Result<bool> {
        if name.len() >= NAME_SIZE {
            bail!("Index name '{}' exceeds {} bytes", name, NAME_SIZE - 1);
        }
        if self.find(name).is_some() {
            return Ok(false);
        }
        let count = self.record_count();
        if count == MAX_RECORDS {
            bail!("Header page is full ({} records)", MAX_RECORDS);
        }
        let offset = RECORDS_OFFSET + count * RECORD_SIZE;
        self.data[offset..offset + NAME_SIZE].fill(0);
        self.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        self.set_root_at(count, root);
        self.set_record_count(count + 1);
        Ok(true)
    }

    /// Update an existing record; false if the name is absent.
    pub fn update_record(&mut self, name: &str, root: PageId) -> bool {
        match self.find(name) {
            Some(index) => {
                self.set_root_at(index, root);
                true
            }
            None => false,
        }
    }

    /// Remove a record; false if the name is absent.
    pub fn delete_record(&mut self, name: &str) -> bool {
        match self.find(name) {
            Some(index) => {
                let count = self.record_count();
                let from = RECORDS_OFFSET + (index + 1) * RECORD_SIZE;
                let to = RECORDS_OFFSET + count * RECORD_SIZE;
                let dest = RECORDS_OFFSET + index * RECORD_SIZE;
                self.data.copy_within(from..to, dest);
                self.set_record_count(count - 1);
                true
            }
            None => false,
        }
    }
}

/// Allocate and format the header page on a fresh database file. A no-op
/// when page 0 already exists.
pub fn ensure_initialized(buffer_pool: &BufferPoolManager) -> Result<()> {
    if buffer_pool.num_disk_pages() > 0 {
        return Ok(());
    }
    let (page_id, mut guard) = buffer_pool.new_page()?;
    if page_id != HEADER_PAGE_ID {
        bail!("Expected the header page at PageId(0), got {}", page_id);
    }
    HeaderPage::init(&mut *guard);
    Ok(())
}
