//! Disk-resident clustered-page B+Tree with latch crabbing.
//!
//! Reads crab shared latches down the tree. Writes first run an
//! optimistic descent (shared latches on internal nodes, exclusive only
//! on the leaf) and restart with an all-exclusive descent when the leaf
//! turns out unsafe, retaining ancestor latches in a per-descent context
//! until a safe node proves the structure change cannot propagate past
//! it. The root id and tree height live under a dedicated root latch that
//! descents which might mutate the root hold until the root is proven
//! immutable.

pub mod iterator;
pub mod key;

use self::key::{IndexKey, KeyComparator};
use crate::access::tuple::TupleId;
use crate::storage::buffer::{BufferPoolManager, PageReadGuard, PageWriteGuard};
use crate::storage::error::EngineError;
use crate::storage::page::btree_internal_page::{
    BTreeInternalPage, BTreeInternalPageMut, INTERNAL_CAPACITY,
};
use crate::storage::page::btree_leaf_page::{BTreeLeafPage, BTreeLeafPageMut, LEAF_CAPACITY};
use crate::storage::page::btree_page::{self, AccessMode, KEY_SIZE};
use crate::storage::page::header_page::{self, HeaderPage};
use crate::storage::page::{PageId, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::transaction::Transaction;
use anyhow::Result;
use parking_lot::lock_api::ArcRwLockWriteGuard;
use parking_lot::{RawRwLock, RwLock};
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

pub use iterator::BTreeIterator;

/// Ordered-index capability the executor layer programs against.
pub trait Index: Send + Sync {
    fn insert_entry(
        &self,
        key: &IndexKey,
        tuple_id: TupleId,
        transaction: &Transaction,
    ) -> Result<bool>;

    fn delete_entry(&self, key: &IndexKey, transaction: &Transaction) -> Result<bool>;

    fn scan_key(&self, key: &IndexKey) -> Result<Option<TupleId>>;

    fn as_any(&self) -> &dyn Any;
}

/// Root identity, guarded by the root latch.
struct RootInfo {
    page_id: PageId,
    height: u32,
}

type RootWriteGuard = ArcRwLockWriteGuard<RawRwLock, RootInfo>;

/// Latches a pessimistic descent is still holding: the root latch plus
/// the exclusively latched ancestors, root first.
struct Context {
    root: Option<RootWriteGuard>,
    write_set: Vec<PageWriteGuard>,
}

impl Context {
    /// Called when a newly acquired node is safe: everything above it can
    /// no longer be touched by this operation.
    fn release_ancestors(&mut self) {
        self.write_set.clear();
        self.root = None;
    }
}

pub struct BPlusTree {
    index_name: String,
    buffer_pool: BufferPoolManager,
    comparator: Box<dyn KeyComparator>,
    /// Stored bounds are one above the split threshold.
    leaf_max_size: usize,
    internal_max_size: usize,
    root: Arc<RwLock<RootInfo>>,
}

impl BPlusTree {
    /// Open (or lazily create on first insert) the index named
    /// `index_name`, recovering its root from the header page.
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: BufferPoolManager,
        comparator: Box<dyn KeyComparator>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let index_name = index_name.into();
        header_page::ensure_initialized(&buffer_pool)?;

        let root_page_id = {
            let mut guard = buffer_pool.fetch_page_write(HEADER_PAGE_ID)?;
            let header = HeaderPage::new(&mut *guard);
            header.get_root_id(&index_name).unwrap_or(INVALID_PAGE_ID)
        };

        let tree = Self {
            index_name,
            buffer_pool,
            comparator,
            leaf_max_size: (leaf_max_size + 1).min(LEAF_CAPACITY),
            internal_max_size: (internal_max_size + 1).min(INTERNAL_CAPACITY),
            root: Arc::new(RwLock::new(RootInfo {
                page_id: root_page_id,
                height: 0,
            })),
        };

        if root_page_id.is_valid() {
            let height = tree.measure_height(root_page_id)?;
            RwLock::write_arc(&tree.root).height = height;
        }

        Ok(tree)
    }

    pub fn is_empty(&self) -> bool {
        !RwLock::read_arc(&self.root).page_id.is_valid()
    }

    pub fn root_page_id(&self) -> PageId {
        RwLock::read_arc(&self.root).page_id
    }

    pub fn height(&self) -> u32 {
        RwLock::read_arc(&self.root).height
    }

    fn measure_height(&self, root_page_id: PageId) -> Result<u32> {
        let mut height = 1;
        let mut guard = self.buffer_pool.fetch_page(root_page_id)?;
        while !btree_page::is_leaf(&*guard) {
            let child = BTreeInternalPage::new(&*guard).child_at(0);
            let child_guard = self.buffer_pool.fetch_page(child)?;
            guard = child_guard;
            height += 1;
        }
        Ok(height)
    }

    /// Point lookup. Crabs shared latches to the leaf and copies the
    /// value out under the leaf's shared latch.
    pub fn get_value(&self, key: &IndexKey) -> Result<Option<TupleId>> {
        match self.find_leaf_shared(Some(key))? {
            Some(guard) => {
                let leaf = BTreeLeafPage::new(&*guard);
                Ok(leaf.lookup(key.as_bytes(), &*self.comparator))
            }
            None => Ok(None),
        }
    }

    /// Descend with shared latches to the leaf covering `key`, or the
    /// leftmost leaf when no key is given. None on an empty tree.
    fn find_leaf_shared(&self, key: Option<&IndexKey>) -> Result<Option<PageReadGuard>> {
        let root = RwLock::read_arc(&self.root);
        if !root.page_id.is_valid() {
            return Ok(None);
        }
        let mut guard = self.buffer_pool.fetch_page(root.page_id)?;
        drop(root);

        loop {
            if btree_page::is_leaf(&*guard) {
                return Ok(Some(guard));
            }
            let internal = BTreeInternalPage::new(&*guard);
            let child = match key {
                Some(key) => internal.lookup(key.as_bytes(), &*self.comparator),
                None => internal.child_at(0),
            };
            // Crabbing: latch the child before releasing its parent.
            let child_guard = self.buffer_pool.fetch_page(child)?;
            guard = child_guard;
        }
    }

    /// Insert a unique key. Returns false (leaving the tree untouched)
    /// when the key is already present. Inserts never drop pages, so the
    /// transaction's deleted-page set stays untouched.
    pub fn insert(
        &self,
        key: &IndexKey,
        tuple_id: TupleId,
        _transaction: &Transaction,
    ) -> Result<bool> {
        if let Some(inserted) = self.insert_optimistic(key, tuple_id)? {
            return Ok(inserted);
        }
        self.insert_pessimistic(key, tuple_id)
    }

    /// Optimistic descent: shared latches down to the leaf's parent,
    /// exclusive only on the leaf. None means the leaf was unsafe and the
    /// caller must restart pessimistically.
    fn insert_optimistic(&self, key: &IndexKey, tuple_id: TupleId) -> Result<Option<bool>> {
        let root = RwLock::read_arc(&self.root);
        if !root.page_id.is_valid() {
            return Ok(None);
        }
        let height = root.height;

        if height == 1 {
            let mut guard = self.buffer_pool.fetch_page_write(root.page_id)?;
            drop(root);
            if !btree_page::is_safe(&*guard, AccessMode::Insert) {
                return Ok(None);
            }
            return Ok(Some(self.leaf_insert(&mut guard, key, tuple_id)));
        }

        let mut guard = self.buffer_pool.fetch_page(root.page_id)?;
        drop(root);
        for depth in 1..height {
            let child = BTreeInternalPage::new(&*guard).lookup(key.as_bytes(), &*self.comparator);
            if depth == height - 1 {
                let mut leaf_guard = self.buffer_pool.fetch_page_write(child)?;
                drop(guard);
                if !btree_page::is_safe(&*leaf_guard, AccessMode::Insert) {
                    return Ok(None);
                }
                return Ok(Some(self.leaf_insert(&mut leaf_guard, key, tuple_id)));
            }
            let child_guard = self.buffer_pool.fetch_page(child)?;
            guard = child_guard;
        }
        unreachable!("descent must terminate at a leaf");
    }

    fn leaf_insert(&self, guard: &mut PageWriteGuard, key: &IndexKey, tuple_id: TupleId) -> bool {
        let mut leaf = BTreeLeafPageMut::new(&mut **guard);
        let old_size = leaf.size();
        leaf.insert(key.as_bytes(), tuple_id, &*self.comparator) != old_size
    }

    /// Pessimistic descent: all-exclusive from the root, retaining unsafe
    /// ancestors in the context.
    fn insert_pessimistic(&self, key: &IndexKey, tuple_id: TupleId) -> Result<bool> {
        let root = RwLock::write_arc(&self.root);
        let mut ctx = Context {
            root: Some(root),
            write_set: Vec::new(),
        };

        let root_page_id = ctx.root.as_ref().expect("root latch held").page_id;
        if !root_page_id.is_valid() {
            // Empty tree: this thread won the root latch and creates the
            // first leaf.
            self.start_new_tree(key, tuple_id, &mut ctx)?;
            return Ok(true);
        }

        let mut page_id = root_page_id;
        loop {
            let guard = self.buffer_pool.fetch_page_write(page_id)?;
            if btree_page::is_safe(&*guard, AccessMode::Insert) {
                ctx.release_ancestors();
            }
            if btree_page::is_leaf(&*guard) {
                return self.insert_into_leaf(guard, key, tuple_id, &mut ctx);
            }
            page_id = BTreeInternalPage::new(&*guard).lookup(key.as_bytes(), &*self.comparator);
            ctx.write_set.push(guard);
        }
    }

    fn start_new_tree(
        &self,
        key: &IndexKey,
        tuple_id: TupleId,
        ctx: &mut Context,
    ) -> Result<()> {
        let (page_id, mut guard) = self.buffer_pool.new_page()?;
        let mut leaf = BTreeLeafPageMut::init(&mut *guard, page_id, self.leaf_max_size);
        leaf.insert(key.as_bytes(), tuple_id, &*self.comparator);
        drop(guard);

        self.publish_root(page_id)?;
        let root = ctx.root.as_mut().expect("root latch held");
        root.page_id = page_id;
        root.height = 1;
        debug!(index = %self.index_name, root = page_id.0, "started new tree");
        Ok(())
    }

    fn insert_into_leaf(
        &self,
        mut leaf_guard: PageWriteGuard,
        key: &IndexKey,
        tuple_id: TupleId,
        ctx: &mut Context,
    ) -> Result<bool> {
        let (duplicate, will_split) = {
            let leaf = BTreeLeafPage::new(&*leaf_guard);
            (
                leaf.lookup(key.as_bytes(), &*self.comparator).is_some(),
                leaf.size() + 1 == leaf.max_size(),
            )
        };
        if duplicate {
            return Ok(false);
        }
        if !will_split {
            self.leaf_insert(&mut leaf_guard, key, tuple_id);
            return Ok(true);
        }

        // The insert reaches the overflow threshold: allocate the sibling
        // before mutating anything so allocation failure leaves the tree
        // intact.
        let (new_page_id, mut new_guard) = self.buffer_pool.new_page()?;
        let mut separator = [0u8; KEY_SIZE];
        {
            let mut new_leaf =
                BTreeLeafPageMut::init(&mut *new_guard, new_page_id, self.leaf_max_size);
            let mut leaf = BTreeLeafPageMut::new(&mut *leaf_guard);
            leaf.insert(key.as_bytes(), tuple_id, &*self.comparator);
            leaf.move_half_to(&mut new_leaf);
            new_leaf.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(new_page_id);
            separator.copy_from_slice(new_leaf.key_at(0));
        }
        debug!(
            index = %self.index_name,
            left = leaf_guard.page_id().0,
            right = new_page_id.0,
            "split leaf"
        );

        self.insert_into_parent(leaf_guard, &separator, new_guard, ctx)?;
        Ok(true)
    }

    /// Wire a freshly split-off page into the parent, splitting upward as
    /// needed. Consumes both page guards.
    fn insert_into_parent(
        &self,
        mut old_guard: PageWriteGuard,
        separator: &[u8],
        mut new_guard: PageWriteGuard,
        ctx: &mut Context,
    ) -> Result<()> {
        let old_page_id = old_guard.page_id();
        let new_page_id = new_guard.page_id();

        if ctx.write_set.is_empty() {
            // The old page is the root: grow the tree by one level.
            let Some(root) = ctx.root.as_mut() else {
                return Err(EngineError::BadInvariant(
                    "root split without the root latch held".into(),
                )
                .into());
            };
            let (root_page_id, mut root_guard) = self.buffer_pool.new_page()?;
            let mut new_root =
                BTreeInternalPageMut::init(&mut *root_guard, root_page_id, self.internal_max_size);
            new_root.populate_new_root(old_page_id, separator, new_page_id);
            btree_page::set_parent_page_id(&mut *old_guard, root_page_id);
            btree_page::set_parent_page_id(&mut *new_guard, root_page_id);
            drop(root_guard);
            drop(old_guard);
            drop(new_guard);

            self.publish_root(root_page_id)?;
            root.page_id = root_page_id;
            root.height += 1;
            debug!(index = %self.index_name, root = root_page_id.0, "grew new root");
            return Ok(());
        }

        let mut parent_guard = ctx.write_set.pop().expect("ancestor set is non-empty");
        let parent_page_id = parent_guard.page_id();
        btree_page::set_parent_page_id(&mut *new_guard, parent_page_id);
        drop(old_guard);
        drop(new_guard);

        let will_split = btree_page::size(&*parent_guard) + 1 == self.internal_max_size;
        if !will_split {
            let mut parent = BTreeInternalPageMut::new(&mut *parent_guard);
            parent.insert_node_after(old_page_id, separator, new_page_id);
            return Ok(());
        }

        let (sibling_page_id, mut sibling_guard) = self.buffer_pool.new_page()?;
        let mut push_key = [0u8; KEY_SIZE];
        {
            let mut parent = BTreeInternalPageMut::new(&mut *parent_guard);
            parent.insert_node_after(old_page_id, separator, new_page_id);
            push_key.copy_from_slice(parent.key_at(parent.min_size()));
            let mut sibling = BTreeInternalPageMut::init(
                &mut *sibling_guard,
                sibling_page_id,
                self.internal_max_size,
            );
            parent.move_half_to(&mut sibling);
        }
        self.reparent_children(&sibling_guard, 0, sibling_page_id)?;
        debug!(
            index = %self.index_name,
            left = parent_page_id.0,
            right = sibling_page_id.0,
            "split internal page"
        );

        self.insert_into_parent(parent_guard, &push_key, sibling_guard, ctx)
    }

    /// Point the parent pointer of `guard`'s children, starting at child
    /// slot `from`, at `parent`. Child latches are free here because the
    /// whole affected path is exclusively latched by this descent.
    fn reparent_children(
        &self,
        guard: &PageWriteGuard,
        from: usize,
        parent: PageId,
    ) -> Result<()> {
        let children: Vec<PageId> = {
            let internal = BTreeInternalPage::new(&**guard);
            (from..internal.size()).map(|i| internal.child_at(i)).collect()
        };
        for child in children {
            let mut child_guard = self.buffer_pool.fetch_page_write(child)?;
            btree_page::set_parent_page_id(&mut *child_guard, parent);
        }
        Ok(())
    }

    /// Remove a key. Returns false when the key was absent.
    pub fn remove(&self, key: &IndexKey, transaction: &Transaction) -> Result<bool> {
        if let Some(removed) = self.remove_optimistic(key)? {
            return Ok(removed);
        }
        self.remove_pessimistic(key, transaction)
    }

    fn remove_optimistic(&self, key: &IndexKey) -> Result<Option<bool>> {
        let root = RwLock::read_arc(&self.root);
        if !root.page_id.is_valid() {
            return Ok(Some(false));
        }
        let height = root.height;

        if height == 1 {
            let mut guard = self.buffer_pool.fetch_page_write(root.page_id)?;
            drop(root);
            // A root leaf about to empty needs the root latch to collapse
            // the tree.
            if btree_page::size(&*guard) <= 1 {
                return Ok(None);
            }
            let mut leaf = BTreeLeafPageMut::new(&mut *guard);
            let old_size = leaf.size();
            return Ok(Some(
                leaf.remove(key.as_bytes(), &*self.comparator) != old_size,
            ));
        }

        let mut guard = self.buffer_pool.fetch_page(root.page_id)?;
        drop(root);
        for depth in 1..height {
            let child = BTreeInternalPage::new(&*guard).lookup(key.as_bytes(), &*self.comparator);
            if depth == height - 1 {
                let mut leaf_guard = self.buffer_pool.fetch_page_write(child)?;
                drop(guard);
                if !btree_page::is_safe(&*leaf_guard, AccessMode::Delete) {
                    return Ok(None);
                }
                let mut leaf = BTreeLeafPageMut::new(&mut *leaf_guard);
                let old_size = leaf.size();
                return Ok(Some(
                    leaf.remove(key.as_bytes(), &*self.comparator) != old_size,
                ));
            }
            let child_guard = self.buffer_pool.fetch_page(child)?;
            guard = child_guard;
        }
        unreachable!("descent must terminate at a leaf");
    }

    fn remove_pessimistic(&self, key: &IndexKey, transaction: &Transaction) -> Result<bool> {
        let root = RwLock::write_arc(&self.root);
        if !root.page_id.is_valid() {
            return Ok(false);
        }
        let mut ctx = Context {
            root: Some(root),
            write_set: Vec::new(),
        };

        let mut page_id = ctx.root.as_ref().expect("root latch held").page_id;
        loop {
            let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
            if btree_page::is_safe(&*guard, AccessMode::Delete) {
                ctx.release_ancestors();
            }
            if btree_page::is_leaf(&*guard) {
                let (old_size, new_size) = {
                    let mut leaf = BTreeLeafPageMut::new(&mut *guard);
                    let old_size = leaf.size();
                    (old_size, leaf.remove(key.as_bytes(), &*self.comparator))
                };
                if new_size == old_size {
                    return Ok(false);
                }
                if btree_page::is_root(&*guard) {
                    if new_size == 0 {
                        self.adjust_root(guard, &mut ctx, transaction)?;
                    }
                } else if new_size < btree_page::min_size(&*guard) {
                    self.coalesce_or_redistribute(guard, &mut ctx, transaction)?;
                }
                return Ok(true);
            }
            page_id = BTreeInternalPage::new(&*guard).lookup(key.as_bytes(), &*self.comparator);
            ctx.write_set.push(guard);
        }
    }

    /// Repair an underflowed non-root node by borrowing one entry from a
    /// sibling, or merging into one when neither sibling can spare any.
    fn coalesce_or_redistribute(
        &self,
        node_guard: PageWriteGuard,
        ctx: &mut Context,
        transaction: &Transaction,
    ) -> Result<()> {
        if btree_page::is_root(&*node_guard) {
            return self.adjust_root(node_guard, ctx, transaction);
        }

        let mut parent_guard = ctx.write_set.pop().ok_or_else(|| {
            EngineError::BadInvariant("underflowed node with no retained parent".into())
        })?;
        let node_page_id = node_guard.page_id();
        let node_size = btree_page::size(&*node_guard);
        let node_max_size = btree_page::max_size(&*node_guard);
        let node_is_leaf = btree_page::is_leaf(&*node_guard);

        let (node_slot, parent_size) = {
            let parent = BTreeInternalPage::new(&*parent_guard);
            let slot = parent.value_index(node_page_id).ok_or_else(|| {
                EngineError::BadInvariant("parent does not reference its child".into())
            })?;
            (slot, parent.size())
        };

        // Probe the left sibling first, then the right, latching each
        // exclusively in turn to measure it. Sibling sizes are stable
        // while the parent stays exclusively latched.
        let mut sibling_slots = Vec::with_capacity(2);
        if node_slot > 0 {
            sibling_slots.push(node_slot - 1);
        }
        if node_slot + 1 < parent_size {
            sibling_slots.push(node_slot + 1);
        }

        let mut redistribute_from = None;
        let mut coalesce_candidate: Option<(usize, usize)> = None;
        for &sibling_slot in &sibling_slots {
            let sibling_page_id = BTreeInternalPage::new(&*parent_guard).child_at(sibling_slot);
            let sibling_guard = self.buffer_pool.fetch_page_write(sibling_page_id)?;
            let sibling_size = btree_page::size(&*sibling_guard);
            drop(sibling_guard);
            if sibling_size + node_size >= node_max_size {
                redistribute_from = Some(sibling_slot);
                break;
            }
            // Remember the smaller coalesce candidate to minimize the
            // entries shifted by the merge.
            match coalesce_candidate {
                Some((_, best_size)) if sibling_size >= best_size => {}
                _ => coalesce_candidate = Some((sibling_slot, sibling_size)),
            }
        }

        if let Some(sibling_slot) = redistribute_from {
            let sibling_page_id = BTreeInternalPage::new(&*parent_guard).child_at(sibling_slot);
            let sibling_guard = self.buffer_pool.fetch_page_write(sibling_page_id)?;
            return self.redistribute(
                sibling_guard,
                node_guard,
                &mut parent_guard,
                sibling_slot,
                node_slot,
            );
        }

        let (sibling_slot, _) = coalesce_candidate.ok_or_else(|| {
            EngineError::BadInvariant("non-root node has no siblings".into())
        })?;
        let sibling_page_id = BTreeInternalPage::new(&*parent_guard).child_at(sibling_slot);
        let sibling_guard = self.buffer_pool.fetch_page_write(sibling_page_id)?;

        // Merge right into left, swapping roles when the chosen sibling
        // sits to the right.
        let (mut left_guard, mut right_guard, right_slot) = if sibling_slot < node_slot {
            (sibling_guard, node_guard, node_slot)
        } else {
            (node_guard, sibling_guard, sibling_slot)
        };
        let left_page_id = left_guard.page_id();
        let dead_page_id = right_guard.page_id();

        if node_is_leaf {
            let mut left = BTreeLeafPageMut::new(&mut *left_guard);
            let mut right = BTreeLeafPageMut::new(&mut *right_guard);
            let next = right.next_page_id();
            right.move_all_to(&mut left);
            left.set_next_page_id(next);
        } else {
            let mut middle_key = [0u8; KEY_SIZE];
            {
                let parent = BTreeInternalPage::new(&*parent_guard);
                middle_key.copy_from_slice(parent.key_at(right_slot));
            }
            let moved_from = {
                let mut left = BTreeInternalPageMut::new(&mut *left_guard);
                let mut right = BTreeInternalPageMut::new(&mut *right_guard);
                let moved_from = left.size();
                right.move_all_to(&mut left, &middle_key);
                moved_from
            };
            self.reparent_children(&left_guard, moved_from, left_page_id)?;
        }

        {
            let mut parent = BTreeInternalPageMut::new(&mut *parent_guard);
            parent.remove_at(right_slot);
        }
        drop(right_guard);
        drop(left_guard);
        if !self.buffer_pool.delete_page(dead_page_id)? {
            transaction.add_deleted_page(dead_page_id);
        }
        debug!(
            index = %self.index_name,
            survivor = left_page_id.0,
            dead = dead_page_id.0,
            "coalesced pages"
        );

        let parent_is_root = btree_page::is_root(&*parent_guard);
        let parent_size = btree_page::size(&*parent_guard);
        if parent_is_root {
            if parent_size == 1 {
                return self.adjust_root(parent_guard, ctx, transaction);
            }
        } else if parent_size < btree_page::min_size(&*parent_guard) {
            return self.coalesce_or_redistribute(parent_guard, ctx, transaction);
        }
        Ok(())
    }

    /// Move exactly one entry from the sibling into the underflowed node
    /// and refresh the parent's separator at the moved boundary.
    fn redistribute(
        &self,
        mut sibling_guard: PageWriteGuard,
        mut node_guard: PageWriteGuard,
        parent_guard: &mut PageWriteGuard,
        sibling_slot: usize,
        node_slot: usize,
    ) -> Result<()> {
        let node_page_id = node_guard.page_id();
        let node_is_leaf = btree_page::is_leaf(&*node_guard);

        if node_is_leaf {
            let mut sibling = BTreeLeafPageMut::new(&mut *sibling_guard);
            let mut node = BTreeLeafPageMut::new(&mut *node_guard);
            if sibling_slot < node_slot {
                sibling.move_last_to_front_of(&mut node);
                let mut separator = [0u8; KEY_SIZE];
                separator.copy_from_slice(node.key_at(0));
                let mut parent = BTreeInternalPageMut::new(&mut **parent_guard);
                parent.set_key_at(node_slot, &separator);
            } else {
                sibling.move_first_to_end_of(&mut node);
                let mut separator = [0u8; KEY_SIZE];
                separator.copy_from_slice(sibling.key_at(0));
                let mut parent = BTreeInternalPageMut::new(&mut **parent_guard);
                parent.set_key_at(sibling_slot, &separator);
            }
            return Ok(());
        }

        if sibling_slot < node_slot {
            let new_separator = {
                let mut middle_key = [0u8; KEY_SIZE];
                {
                    let parent = BTreeInternalPage::new(&**parent_guard);
                    middle_key.copy_from_slice(parent.key_at(node_slot));
                }
                let mut sibling = BTreeInternalPageMut::new(&mut *sibling_guard);
                let mut node = BTreeInternalPageMut::new(&mut *node_guard);
                sibling.move_last_to_front_of(&mut node, &middle_key)
            };
            {
                let mut parent = BTreeInternalPageMut::new(&mut **parent_guard);
                parent.set_key_at(node_slot, &new_separator);
            }
            // The rotated-in child changed parents.
            let moved_child = BTreeInternalPage::new(&*node_guard).child_at(0);
            let mut child_guard = self.buffer_pool.fetch_page_write(moved_child)?;
            btree_page::set_parent_page_id(&mut *child_guard, node_page_id);
        } else {
            let new_separator = {
                let mut middle_key = [0u8; KEY_SIZE];
                {
                    let parent = BTreeInternalPage::new(&**parent_guard);
                    middle_key.copy_from_slice(parent.key_at(sibling_slot));
                }
                let mut sibling = BTreeInternalPageMut::new(&mut *sibling_guard);
                let mut node = BTreeInternalPageMut::new(&mut *node_guard);
                sibling.move_first_to_end_of(&mut node, &middle_key)
            };
            {
                let mut parent = BTreeInternalPageMut::new(&mut **parent_guard);
                parent.set_key_at(sibling_slot, &new_separator);
            }
            let moved_child = {
                let node = BTreeInternalPage::new(&*node_guard);
                node.child_at(node.size() - 1)
            };
            let mut child_guard = self.buffer_pool.fetch_page_write(moved_child)?;
            btree_page::set_parent_page_id(&mut *child_guard, node_page_id);
        }
        Ok(())
    }

    /// Handle an underflowing root: collapse a single-child internal root
    /// into its child, or drop the tree entirely when the root leaf
    /// empties. A root with entries left needs no repair.
    fn adjust_root(
        &self,
        mut root_guard: PageWriteGuard,
        ctx: &mut Context,
        transaction: &Transaction,
    ) -> Result<()> {
        let Some(root) = ctx.root.as_mut() else {
            return Err(EngineError::BadInvariant(
                "root adjustment without the root latch held".into(),
            )
            .into());
        };
        let old_root_page_id = root_guard.page_id();

        if !btree_page::is_leaf(&*root_guard) {
            if btree_page::size(&*root_guard) != 1 {
                return Ok(());
            }
            let child_page_id = {
                let mut old_root = BTreeInternalPageMut::new(&mut *root_guard);
                old_root.remove_and_return_only_child()
            };
            drop(root_guard);

            let mut child_guard = self.buffer_pool.fetch_page_write(child_page_id)?;
            btree_page::set_parent_page_id(&mut *child_guard, child_page_id);
            drop(child_guard);

            self.publish_root(child_page_id)?;
            root.page_id = child_page_id;
            root.height -= 1;
            if !self.buffer_pool.delete_page(old_root_page_id)? {
                transaction.add_deleted_page(old_root_page_id);
            }
            debug!(index = %self.index_name, root = child_page_id.0, "collapsed root");
            return Ok(());
        }

        if btree_page::size(&*root_guard) == 0 {
            drop(root_guard);
            root.page_id = INVALID_PAGE_ID;
            root.height = 0;
            self.drop_header_record()?;
            if !self.buffer_pool.delete_page(old_root_page_id)? {
                transaction.add_deleted_page(old_root_page_id);
            }
            debug!(index = %self.index_name, "tree emptied");
        }
        Ok(())
    }

    /// Forward cursor positioned at the smallest key.
    pub fn iter(&self) -> Result<BTreeIterator> {
        match self.find_leaf_shared(None)? {
            Some(guard) => BTreeIterator::positioned(self.buffer_pool.clone(), guard, 0),
            None => Ok(BTreeIterator::end(self.buffer_pool.clone())),
        }
    }

    /// Forward cursor positioned at the first key >= `key`.
    pub fn iter_from(&self, key: &IndexKey) -> Result<BTreeIterator> {
        match self.find_leaf_shared(Some(key))? {
            Some(guard) => {
                let index = {
                    let leaf = BTreeLeafPage::new(&*guard);
                    leaf.key_index(key.as_bytes(), &*self.comparator)
                        .unwrap_or_else(|| leaf.size())
                };
                BTreeIterator::positioned(self.buffer_pool.clone(), guard, index)
            }
            None => Ok(BTreeIterator::end(self.buffer_pool.clone())),
        }
    }

    /// Record the new root id in the header page, under its exclusive
    /// latch.
    fn publish_root(&self, root_page_id: PageId) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(&mut *guard);
        if !header.update_record(&self.index_name, root_page_id) {
            header.insert_record(&self.index_name, root_page_id)?;
        }
        Ok(())
    }

    fn drop_header_record(&self) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(&mut *guard);
        header.delete_record(&self.index_name);
        Ok(())
    }
}

impl Index for BPlusTree {
    fn insert_entry(
        &self,
        key: &IndexKey,
        tuple_id: TupleId,
        transaction: &Transaction,
    ) -> Result<bool> {
        self.insert(key, tuple_id, transaction)
    }

    fn delete_entry(&self, key: &IndexKey, transaction: &Transaction) -> Result<bool> {
        self.remove(key, transaction)
    }

    fn scan_key(&self, key: &IndexKey) -> Result<Option<TupleId>> {
        self.get_value(key)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
