//! Forward ordered cursor over the leaf chain.
//!
//! The cursor holds a shared latch (and pin) on the current leaf for as
//! long as it points into it; advancing past the last entry crabs to the
//! next leaf through the sibling pointer. Dropping the iterator releases
//! the held latch and pin.

use crate::access::btree::key::IndexKey;
use crate::access::tuple::TupleId;
use crate::storage::buffer::{BufferPoolManager, PageReadGuard};
use crate::storage::page::btree_leaf_page::BTreeLeafPage;
use crate::storage::page::btree_page;
use anyhow::Result;

const LATCH_SPIN_LIMIT: usize = 64;

pub struct BTreeIterator {
    buffer_pool: BufferPoolManager,
    leaf: Option<PageReadGuard>,
    index: usize,
}

impl BTreeIterator {
    /// The terminal sentinel.
    pub(crate) fn end(buffer_pool: BufferPoolManager) -> Self {
        Self {
            buffer_pool,
            leaf: None,
            index: 0,
        }
    }

    pub(crate) fn positioned(
        buffer_pool: BufferPoolManager,
        leaf: PageReadGuard,
        index: usize,
    ) -> Result<Self> {
        let mut iterator = Self {
            buffer_pool,
            leaf: Some(leaf),
            index,
        };
        iterator.skip_exhausted_leaves()?;
        Ok(iterator)
    }

    pub fn is_end(&self) -> bool {
        self.leaf.is_none()
    }

    /// Return the entry under the cursor and step forward. None at the
    /// end of the chain.
    pub fn advance(&mut self) -> Result<Option<(IndexKey, TupleId)>> {
        let entry = match &self.leaf {
            Some(guard) => {
                let leaf = BTreeLeafPage::new(&**guard);
                (
                    IndexKey::from_bytes(leaf.key_at(self.index)),
                    leaf.tuple_id_at(self.index),
                )
            }
            None => return Ok(None),
        };
        self.index += 1;
        self.skip_exhausted_leaves()?;
        Ok(Some(entry))
    }

    /// Move to the next leaf whenever the intra-leaf offset has run off
    /// the current one; becomes the sentinel at the end of the chain.
    fn skip_exhausted_leaves(&mut self) -> Result<()> {
        loop {
            let next_page_id = match &self.leaf {
                Some(guard) => {
                    let leaf = BTreeLeafPage::new(&**guard);
                    if self.index < leaf.size() {
                        return Ok(());
                    }
                    leaf.next_page_id()
                }
                None => return Ok(()),
            };

            if !next_page_id.is_valid() {
                self.leaf = None;
                return Ok(());
            }

            // Crab: try to latch the next leaf while still holding the
            // current one. On sustained contention (a structure change
            // walking right-to-left), release the current leaf first to
            // break the hold-and-wait.
            let mut next_guard = None;
            for _ in 0..LATCH_SPIN_LIMIT {
                if let Some(guard) = self.buffer_pool.try_fetch_page(next_page_id)? {
                    next_guard = Some(guard);
                    break;
                }
                std::hint::spin_loop();
            }
            let next_guard = match next_guard {
                Some(guard) => guard,
                None => {
                    self.leaf = None;
                    self.buffer_pool.fetch_page(next_page_id)?
                }
            };

            // The chain may have been reorganized while unlatched.
            if !btree_page::is_leaf(&*next_guard) {
                self.leaf = None;
                return Ok(());
            }

            self.leaf = Some(next_guard);
            self.index = 0;
        }
    }
}
