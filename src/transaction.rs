//! Per-operation transaction context.
//!
//! The engine core does not roll back: the transaction object only
//! carries the deleted-page set so pages that were still pinned when a
//! coalesce dropped them (for example by a concurrent iterator) get
//! reclaimed at commit.

use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::PageId;
use anyhow::Result;
use parking_lot::Mutex;

pub struct Transaction {
    deleted_pages: Mutex<Vec<PageId>>,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            deleted_pages: Mutex::new(Vec::new()),
        }
    }

    pub fn add_deleted_page(&self, page_id: PageId) {
        self.deleted_pages.lock().push(page_id);
    }

    pub fn deleted_pages(&self) -> Vec<PageId> {
        self.deleted_pages.lock().clone()
    }

    /// Post-commit cleanup: re-attempt pool deletion for every page the
    /// operation dropped. A page that is still pinned stays queued.
    pub fn commit(&self, buffer_pool: &BufferPoolManager) -> Result<()> {
        let mut deleted = self.deleted_pages.lock();
        deleted.retain(|&page_id| !buffer_pool.delete_page(page_id).unwrap_or(false));
        Ok(())
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deleted_page_set() {
        let transaction = Transaction::new();
        transaction.add_deleted_page(PageId(3));
        transaction.add_deleted_page(PageId(5));
        assert_eq!(transaction.deleted_pages(), vec![PageId(3), PageId(5)]);
    }
}
