pub mod lru;
pub mod replacer;

use crate::storage::error::EngineError;
use crate::storage::page::{PageId, INVALID_PAGE_ID};
use crate::storage::{PageManager, PAGE_SIZE};
use anyhow::Result;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use replacer::{FrameId, Replacer};
use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

type FrameReadGuard = ArcRwLockReadGuard<RawRwLock, FrameData>;
type FrameWriteGuard = ArcRwLockWriteGuard<RawRwLock, FrameData>;

/// The latched portion of a frame: the page bytes and the identity of the
/// page currently resident in them.
struct FrameData {
    page_id: PageId,
    buf: Box<[u8; PAGE_SIZE]>,
}

/// A buffer pool slot. The RwLock doubles as the page latch; pin count and
/// dirty bit live outside it so the pool can account for a frame without
/// latching it.
struct Frame {
    data: Arc<RwLock<FrameData>>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
}

impl Frame {
    fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(FrameData {
                page_id: INVALID_PAGE_ID,
                buf: Box::new([0u8; PAGE_SIZE]),
            })),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }
}

/// Metadata mutated only under the pool lock. Pin-count transitions from
/// and to zero happen here, which is what makes eviction race-free.
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: Vec<FrameId>,
}

struct BufferPoolInner {
    frames: Vec<Frame>,
    state: Mutex<PoolState>,
    replacer: Box<dyn Replacer>,
    page_manager: Mutex<PageManager>,
}

#[derive(Clone)]
pub struct BufferPoolManager {
    inner: Arc<BufferPoolInner>,
}

impl BufferPoolManager {
    pub fn new(page_manager: PageManager, replacer: Box<dyn Replacer>, max_frames: usize) -> Self {
        let frames = (0..max_frames).map(|_| Frame::new()).collect();
        Self {
            inner: Arc::new(BufferPoolInner {
                frames,
                state: Mutex::new(PoolState {
                    page_table: HashMap::with_capacity(max_frames),
                    free_list: (0..max_frames as FrameId).rev().collect(),
                }),
                replacer,
                page_manager: Mutex::new(page_manager),
            }),
        }
    }

    /// Fetch a page and take its latch in shared mode. The returned guard
    /// unlatches and unpins (clean) on drop.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageReadGuard> {
        let frame_id = self.pin_frame(page_id)?;
        let frame = &self.inner.frames[frame_id as usize];
        let guard = RwLock::read_arc(&frame.data);
        Ok(PageReadGuard {
            pool: self.clone(),
            frame_id,
            guard: ManuallyDrop::new(guard),
        })
    }

    /// Fetch a page and take its latch in exclusive mode. The returned
    /// guard unlatches and unpins (dirty) on drop.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard> {
        let frame_id = self.pin_frame(page_id)?;
        let frame = &self.inner.frames[frame_id as usize];
        let guard = RwLock::write_arc(&frame.data);
        Ok(PageWriteGuard {
            pool: self.clone(),
            frame_id,
            guard: ManuallyDrop::new(guard),
        })
    }

    /// Fetch a page, taking its shared latch only if it is immediately
    /// available. Returns None on latch contention; the pin is undone.
    pub fn try_fetch_page(&self, page_id: PageId) -> Result<Option<PageReadGuard>> {
        let frame_id = self.pin_frame(page_id)?;
        let frame = &self.inner.frames[frame_id as usize];
        match RwLock::try_read_arc(&frame.data) {
            Some(guard) => Ok(Some(PageReadGuard {
                pool: self.clone(),
                frame_id,
                guard: ManuallyDrop::new(guard),
            })),
            None => {
                self.unpin_frame(frame_id, false);
                Ok(None)
            }
        }
    }

    /// Allocate a fresh zeroed page, pinned and exclusively latched.
    pub fn new_page(&self) -> Result<(PageId, PageWriteGuard)> {
        let page_id = self.inner.page_manager.lock().allocate_page()?;

        let mut state = self.inner.state.lock();
        let frame_id = self.take_frame(&mut state)?;
        let frame = &self.inner.frames[frame_id as usize];
        let mut guard = RwLock::try_write_arc(&frame.data)
            .expect("page latch held on an unpinned frame (pin-count drift)");
        frame.pin_count.store(1, Ordering::SeqCst);
        frame.is_dirty.store(true, Ordering::SeqCst);
        state.page_table.insert(page_id, frame_id);
        self.inner.replacer.pin(frame_id);
        drop(state);

        guard.page_id = page_id;
        guard.buf.fill(0);

        Ok((
            page_id,
            PageWriteGuard {
                pool: self.clone(),
                frame_id,
                guard: ManuallyDrop::new(guard),
            },
        ))
    }

    /// Drop a page from the pool and return its id to the disk allocator.
    /// Refused (Ok(false)) while the page is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.inner.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.inner.frames[frame_id as usize];
            if frame.pin_count.load(Ordering::SeqCst) > 0 {
                return Ok(false);
            }
            state.page_table.remove(&page_id);
            self.inner.replacer.pin(frame_id);
            let mut guard = RwLock::try_write_arc(&frame.data)
                .expect("page latch held on an unpinned frame (pin-count drift)");
            guard.page_id = INVALID_PAGE_ID;
            drop(guard);
            frame.is_dirty.store(false, Ordering::SeqCst);
            state.free_list.push(frame_id);
        }
        self.inner.page_manager.lock().deallocate_page(page_id);
        Ok(true)
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let state = self.inner.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.inner.frames[frame_id as usize];
            let guard = RwLock::read_arc(&frame.data);
            if frame.is_dirty.load(Ordering::SeqCst) {
                self.inner
                    .page_manager
                    .lock()
                    .write_page(page_id, guard.buf.as_ref())?;
                frame.is_dirty.store(false, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    pub fn flush_all(&self) -> Result<()> {
        let state = self.inner.state.lock();
        for (&page_id, &frame_id) in state.page_table.iter() {
            let frame = &self.inner.frames[frame_id as usize];
            let guard = RwLock::read_arc(&frame.data);
            if frame.is_dirty.load(Ordering::SeqCst) {
                self.inner
                    .page_manager
                    .lock()
                    .write_page(page_id, guard.buf.as_ref())?;
                frame.is_dirty.store(false, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    /// Number of pages allocated on disk.
    pub fn num_disk_pages(&self) -> u32 {
        self.inner.page_manager.lock().num_pages()
    }

    /// Pin the frame holding `page_id`, loading it from disk on a miss.
    /// Returns with the frame pinned and unlatched.
    fn pin_frame(&self, page_id: PageId) -> Result<FrameId> {
        let mut state = self.inner.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.inner.frames[frame_id as usize];
            frame.pin_count.fetch_add(1, Ordering::SeqCst);
            self.inner.replacer.pin(frame_id);
            return Ok(frame_id);
        }

        // Miss: claim a frame under the pool lock, then read the page in
        // with only the frame's exclusive latch held.
        let frame_id = self.take_frame(&mut state)?;
        let frame = &self.inner.frames[frame_id as usize];
        let mut guard = RwLock::try_write_arc(&frame.data)
            .expect("page latch held on an unpinned frame (pin-count drift)");
        frame.pin_count.store(1, Ordering::SeqCst);
        frame.is_dirty.store(false, Ordering::SeqCst);
        state.page_table.insert(page_id, frame_id);
        self.inner.replacer.pin(frame_id);
        drop(state);

        guard.page_id = page_id;
        let read_result = self
            .inner
            .page_manager
            .lock()
            .read_page(page_id, guard.buf.as_mut());
        if let Err(e) = read_result {
            guard.page_id = INVALID_PAGE_ID;
            drop(guard);
            let mut state = self.inner.state.lock();
            state.page_table.remove(&page_id);
            state.free_list.push(frame_id);
            frame.pin_count.store(0, Ordering::SeqCst);
            return Err(e);
        }

        Ok(frame_id)
    }

    /// Claim a frame from the free list, evicting the LRU victim if none
    /// is free. The caller still holds the pool lock.
    fn take_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop() {
            return Ok(frame_id);
        }

        let frame_id = self
            .inner
            .replacer
            .victim()
            .ok_or(EngineError::OutOfMemory)?;
        let frame = &self.inner.frames[frame_id as usize];
        debug_assert_eq!(frame.pin_count.load(Ordering::SeqCst), 0);

        let guard = RwLock::try_read_arc(&frame.data)
            .expect("page latch held on an unpinned frame (pin-count drift)");
        let old_page_id = guard.page_id;
        if frame.is_dirty.load(Ordering::SeqCst) {
            self.inner
                .page_manager
                .lock()
                .write_page(old_page_id, guard.buf.as_ref())?;
            frame.is_dirty.store(false, Ordering::SeqCst);
        }
        drop(guard);
        state.page_table.remove(&old_page_id);
        debug!(frame_id, page_id = old_page_id.0, "evicted frame");

        Ok(frame_id)
    }

    /// The other half of every fetch: drop the pin, recording whether the
    /// caller dirtied the page. The zero transition happens under the pool
    /// lock so it cannot interleave with a concurrent pin of the same
    /// frame.
    fn unpin_frame(&self, frame_id: FrameId, dirty: bool) {
        let frame = &self.inner.frames[frame_id as usize];
        if dirty {
            frame.is_dirty.store(true, Ordering::SeqCst);
        }
        let _state = self.inner.state.lock();
        let prev = frame.pin_count.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "unpin of an unpinned frame (pin-count drift)");
        if prev == 1 {
            self.inner.replacer.unpin(frame_id);
        }
    }
}

/// Shared-latched view of a page. Dropping releases the latch and then
/// unpins clean, so every fetch is paired with exactly one unpin.
pub struct PageReadGuard {
    pool: BufferPoolManager,
    frame_id: FrameId,
    guard: ManuallyDrop<FrameReadGuard>,
}

impl PageReadGuard {
    pub fn page_id(&self) -> PageId {
        self.guard.page_id
    }
}

impl Deref for PageReadGuard {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        &self.guard.buf
    }
}

impl Drop for PageReadGuard {
    fn drop(&mut self) {
        // Unlatch before unpinning.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        self.pool.unpin_frame(self.frame_id, false);
    }
}

/// Exclusive-latched view of a page. Dropping releases the latch and then
/// unpins dirty.
pub struct PageWriteGuard {
    pool: BufferPoolManager,
    frame_id: FrameId,
    guard: ManuallyDrop<FrameWriteGuard>,
}

impl std::fmt::Debug for PageWriteGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageWriteGuard")
            .field("frame_id", &self.frame_id)
            .finish()
    }
}

impl PageWriteGuard {
    pub fn page_id(&self) -> PageId {
        self.guard.page_id
    }
}

impl Deref for PageWriteGuard {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        &self.guard.buf
    }
}

impl DerefMut for PageWriteGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard.buf
    }
}

impl Drop for PageWriteGuard {
    fn drop(&mut self) {
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        self.pool.unpin_frame(self.frame_id, true);
    }
}

#[cfg(test)]
mod tests {
    use super::lru::LruReplacer;
    use super::*;
    use tempfile::tempdir;

    fn create_pool(max_frames: usize) -> Result<(BufferPoolManager, tempfile::TempDir)> {
        let dir = tempdir()?;
        let page_manager = PageManager::create(&dir.path().join("test.db"))?;
        let replacer = Box::new(LruReplacer::new(max_frames));
        Ok((
            BufferPoolManager::new(page_manager, replacer, max_frames),
            dir,
        ))
    }

    #[test]
    fn test_new_page_and_fetch() -> Result<()> {
        let (pool, _dir) = create_pool(4)?;

        let (page_id, mut guard) = pool.new_page()?;
        guard[0] = 0x42;
        drop(guard);

        let guard = pool.fetch_page(page_id)?;
        assert_eq!(guard[0], 0x42);
        assert_eq!(guard.page_id(), page_id);

        Ok(())
    }

    #[test]
    fn test_eviction_round_trips_through_disk() -> Result<()> {
        let (pool, _dir) = create_pool(3)?;

        let mut page_ids = Vec::new();
        for i in 0..3u8 {
            let (page_id, mut guard) = pool.new_page()?;
            guard[0] = i;
            page_ids.push(page_id);
        }

        // All three guards are dropped; allocating more pages forces the
        // originals out through the replacer.
        for _ in 0..3 {
            let (_, guard) = pool.new_page()?;
            drop(guard);
        }

        for (i, &page_id) in page_ids.iter().enumerate() {
            let guard = pool.fetch_page(page_id)?;
            assert_eq!(guard[0], i as u8);
        }

        Ok(())
    }

    #[test]
    fn test_pinned_pages_exhaust_pool() -> Result<()> {
        let (pool, _dir) = create_pool(2)?;

        let (_, _g1) = pool.new_page()?;
        let (_, _g2) = pool.new_page()?;

        let err = pool.new_page().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::OutOfMemory)
        ));

        Ok(())
    }

    #[test]
    fn test_delete_page_refused_while_pinned() -> Result<()> {
        let (pool, _dir) = create_pool(4)?;

        let (page_id, guard) = pool.new_page()?;
        assert!(!pool.delete_page(page_id)?);
        drop(guard);
        assert!(pool.delete_page(page_id)?);

        Ok(())
    }

    #[test]
    fn test_shared_latch_allows_concurrent_readers() -> Result<()> {
        let (pool, _dir) = create_pool(4)?;

        let (page_id, guard) = pool.new_page()?;
        drop(guard);

        let r1 = pool.fetch_page(page_id)?;
        let r2 = pool.fetch_page(page_id)?;
        assert_eq!(r1.page_id(), r2.page_id());

        assert!(pool.try_fetch_page(page_id)?.is_some());

        Ok(())
    }

    #[test]
    fn test_try_fetch_fails_under_exclusive_latch() -> Result<()> {
        let (pool, _dir) = create_pool(4)?;

        let (page_id, guard) = pool.new_page()?;
        assert!(pool.try_fetch_page(page_id)?.is_none());
        drop(guard);
        assert!(pool.try_fetch_page(page_id)?.is_some());

        Ok(())
    }

    #[test]
    fn test_concurrent_fetches_of_one_page() -> Result<()> {
        let (pool, _dir) = create_pool(4)?;

        let (page_id, mut guard) = pool.new_page()?;
        guard[0] = 7;
        drop(guard);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    let guard = pool.fetch_page(page_id).unwrap();
                    assert_eq!(guard[0], 7);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        Ok(())
    }
}
