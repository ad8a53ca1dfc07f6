use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::Mutex;

use crate::common::{FrameId, PageId, Result, INVALID_PAGE_ID, PAGE_SIZE};
use crate::container::ExtendibleHashTable;
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{Frame, LruKReplacer, ReadPageGuard, WritePageGuard};

/// Bucket size for the page-table hash directory
const PAGE_TABLE_BUCKET_SIZE: usize = 8;

/// State behind the buffer pool latch: the free list and the page id
/// allocator. Compound transitions (allocate, fetch, evict, delete) hold
/// this mutex for their whole duration, disk I/O included.
struct PoolInner {
    free_list: VecDeque<FrameId>,
    next_page_id: u32,
}

/// Shared state, kept behind an Arc so page guards can unpin through it
/// after the manager handle itself has moved.
struct PoolState {
    frames: Vec<Arc<Frame>>,
    inner: Mutex<PoolInner>,
    /// Page table: maps resident page IDs to frame IDs
    page_table: ExtendibleHashTable<PageId, FrameId>,
    /// LRU-K replacer for eviction decisions
    replacer: LruKReplacer,
    /// Disk scheduler for page I/O
    disk_scheduler: DiskScheduler,
}

impl PoolState {
    /// Unpin path shared by `unpin_page` and the guard release callbacks.
    fn unpin(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _inner = self.inner.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.as_usize()];
        if frame.pin_count() == 0 {
            return false;
        }

        // Dirty is sticky: unpinning clean never clears it.
        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == Some(0) {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }
}

/// BufferPoolManager caches disk pages in a fixed array of frames.
///
/// It owns the free list, the page table (an extendible hash directory),
/// the LRU-K replacer, and the disk scheduler. Pages are pinned while in
/// use; an unpinned page becomes a candidate for eviction and its frame
/// may be reused at any time.
pub struct BufferPoolManager {
    pool_size: usize,
    state: Arc<PoolState>,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager with the given pool size, k value
    /// for LRU-K, and disk manager. Page ids are allocated from 1 upward;
    /// page 0 is the reserved header page.
    pub fn new(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(Frame::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(PoolState {
            frames,
            inner: Mutex::new(PoolInner {
                free_list,
                next_page_id: 1,
            }),
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            replacer: LruKReplacer::new(k, pool_size),
            disk_scheduler: DiskScheduler::new(disk_manager),
        });

        Self { pool_size, state }
    }

    /// Allocates a brand-new zeroed page and pins it in a frame.
    /// Returns `Ok(None)` when every frame is pinned.
    pub fn new_page(&self) -> Result<Option<Arc<Frame>>> {
        let mut inner = self.state.inner.lock();

        let Some(frame_id) = self.acquire_frame(&mut inner)? else {
            return Ok(None);
        };

        let page_id = PageId::new(inner.next_page_id);
        inner.next_page_id += 1;

        let frame = &self.state.frames[frame_id.as_usize()];
        frame.reset();
        frame.set_page_id(page_id);
        frame.pin();

        self.state.page_table.insert(page_id, frame_id);
        self.state.replacer.record_access(frame_id);
        self.state.replacer.set_evictable(frame_id, false);

        trace!("allocated {} in {}", page_id, frame_id);
        Ok(Some(Arc::clone(frame)))
    }

    /// Fetches the page into a frame (from the pool or from disk) and
    /// pins it. Returns `Ok(None)` when every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Option<Arc<Frame>>> {
        assert_ne!(page_id, INVALID_PAGE_ID, "fetch of the invalid page id");

        let mut inner = self.state.inner.lock();

        if let Some(frame_id) = self.state.page_table.find(&page_id) {
            let frame = &self.state.frames[frame_id.as_usize()];
            frame.pin();
            self.state.replacer.record_access(frame_id);
            self.state.replacer.set_evictable(frame_id, false);
            return Ok(Some(Arc::clone(frame)));
        }

        let Some(frame_id) = self.acquire_frame(&mut inner)? else {
            return Ok(None);
        };

        let frame = &self.state.frames[frame_id.as_usize()];
        let mut data = [0u8; PAGE_SIZE];
        self.state
            .disk_scheduler
            .schedule_read_sync(page_id, &mut data)?;
        frame.copy_from(&data);
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();

        self.state.page_table.insert(page_id, frame_id);
        self.state.replacer.record_access(frame_id);
        self.state.replacer.set_evictable(frame_id, false);

        Ok(Some(Arc::clone(frame)))
    }

    /// Drops one pin on the page. Returns false if the page is not
    /// resident or its pin count is already zero. The dirty flag is
    /// sticky: `is_dirty = false` never clears it.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.state.unpin(page_id, is_dirty)
    }

    /// Writes the page to disk regardless of its dirty state and clears
    /// the dirty flag. Returns false if the page is not resident.
    /// The pin count is ignored.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let _inner = self.state.inner.lock();

        let Some(frame_id) = self.state.page_table.find(&page_id) else {
            return Ok(false);
        };
        let frame = &self.state.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        self.state.disk_scheduler.schedule_write_sync(page_id, &data)?;
        frame.set_dirty(false);

        Ok(true)
    }

    /// Writes every resident page to disk and clears all dirty flags.
    pub fn flush_all_pages(&self) -> Result<()> {
        let _inner = self.state.inner.lock();

        for frame in &self.state.frames {
            let page_id = frame.page_id();
            if page_id == INVALID_PAGE_ID {
                continue;
            }
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.state.disk_scheduler.schedule_write_sync(page_id, &data)?;
            frame.set_dirty(false);
        }

        Ok(())
    }

    /// Drops the page from the pool and deallocates its storage.
    /// Vacuously true when the page is not resident; false when pinned.
    /// Dirty bytes are not written back - the contents are being
    /// discarded and the disk copy is zeroed.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.state.inner.lock();

        let Some(frame_id) = self.state.page_table.find(&page_id) else {
            return Ok(true);
        };
        let frame = &self.state.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            return Ok(false);
        }

        self.state.page_table.remove(&page_id);
        self.state.replacer.remove(frame_id);
        frame.reset();
        inner.free_list.push_back(frame_id);

        // Deallocation zeroes the stored page.
        self.state
            .disk_scheduler
            .disk_manager()
            .deallocate_page(page_id)?;

        debug!("deleted {} from {}", page_id, frame_id);
        Ok(true)
    }

    /// Fetches the page and takes its page latch shared. The guard keeps
    /// the page pinned; dropping it unpins.
    pub fn read_page(&self, page_id: PageId) -> Result<Option<ReadPageGuard>> {
        let Some(frame) = self.fetch_page(page_id)? else {
            return Ok(None);
        };

        let state = Arc::clone(&self.state);
        let guard = unsafe {
            ReadPageGuard::new(
                page_id,
                frame,
                Box::new(move |pid, is_dirty| {
                    state.unpin(pid, is_dirty);
                }),
            )
        };
        Ok(Some(guard))
    }

    /// Fetches the page and takes its page latch exclusive. The guard
    /// keeps the page pinned; dropping it unpins, marking the page dirty
    /// if the bytes were written.
    pub fn write_page(&self, page_id: PageId) -> Result<Option<WritePageGuard>> {
        let Some(frame) = self.fetch_page(page_id)? else {
            return Ok(None);
        };

        let state = Arc::clone(&self.state);
        let guard = unsafe {
            WritePageGuard::new(
                page_id,
                frame,
                Box::new(move |pid, is_dirty| {
                    state.unpin(pid, is_dirty);
                }),
            )
        };
        Ok(Some(guard))
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.inner.lock().free_list.len()
    }

    /// Pin count of a resident page, or None if not resident.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let _inner = self.state.inner.lock();
        self.state
            .page_table
            .find(&page_id)
            .map(|frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.state.disk_scheduler.disk_manager()
    }

    /// Takes a frame for a new resident page: from the free list, or by
    /// evicting the replacer's victim (writing it back first if dirty).
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<Option<FrameId>> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(Some(frame_id));
        }

        let Some(frame_id) = self.state.replacer.evict() else {
            return Ok(None);
        };

        let frame = &self.state.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.state
                .disk_scheduler
                .schedule_write_sync(old_page_id, &data)?;
            trace!("evicted dirty {} from {}", old_page_id, frame_id);
        }

        self.state.page_table.remove(&old_page_id);
        frame.reset();

        Ok(Some(frame_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = BufferPoolManager::new(pool_size, 2, dm);
        (bpm, temp_file)
    }

    #[test]
    fn test_new_page_pins() {
        let (bpm, _temp) = create_bpm(10);

        let frame = bpm.new_page().unwrap().unwrap();
        let page_id = frame.page_id();
        assert_eq!(page_id, PageId::new(1));
        assert_eq!(bpm.pin_count(page_id), Some(1));
        assert_eq!(bpm.free_frame_count(), 9);
    }

    #[test]
    fn test_unpin_semantics() {
        let (bpm, _temp) = create_bpm(10);

        let frame = bpm.new_page().unwrap().unwrap();
        let page_id = frame.page_id();

        assert!(bpm.unpin_page(page_id, false));
        // Over-unpin
        assert!(!bpm.unpin_page(page_id, false));
        // Unknown page
        assert!(!bpm.unpin_page(PageId::new(999), false));
    }

    #[test]
    fn test_sticky_dirty() {
        let (bpm, _temp) = create_bpm(10);

        let frame = bpm.new_page().unwrap().unwrap();
        let page_id = frame.page_id();
        assert!(bpm.unpin_page(page_id, true));
        assert!(frame.is_dirty());

        bpm.fetch_page(page_id).unwrap().unwrap();
        // Unpinning clean does not wash out the earlier dirty bit.
        assert!(bpm.unpin_page(page_id, false));
        assert!(frame.is_dirty());

        // Only a flush clears it.
        assert!(bpm.flush_page(page_id).unwrap());
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_pool_exhaustion() {
        let (bpm, _temp) = create_bpm(2);

        let f1 = bpm.new_page().unwrap().unwrap();
        let f2 = bpm.new_page().unwrap().unwrap();
        assert!(bpm.new_page().unwrap().is_none());

        bpm.unpin_page(f1.page_id(), false);
        assert!(bpm.new_page().unwrap().is_some());
        let _ = f2;
    }

    #[test]
    fn test_guard_read_write() {
        let (bpm, _temp) = create_bpm(10);

        let frame = bpm.new_page().unwrap().unwrap();
        let page_id = frame.page_id();
        bpm.unpin_page(page_id, false);

        {
            let mut guard = bpm.write_page(page_id).unwrap().unwrap();
            guard.data_mut()[0] = 0xDE;
            guard.data_mut()[1] = 0xAD;
        }
        assert_eq!(bpm.pin_count(page_id), Some(0));

        {
            let guard = bpm.read_page(page_id).unwrap().unwrap();
            assert_eq!(guard.data()[0], 0xDE);
            assert_eq!(guard.data()[1], 0xAD);
        }
        assert_eq!(bpm.pin_count(page_id), Some(0));
    }

    #[test]
    fn test_delete_page() {
        let (bpm, _temp) = create_bpm(10);

        let frame = bpm.new_page().unwrap().unwrap();
        let page_id = frame.page_id();

        // Pinned: refused.
        assert!(!bpm.delete_page(page_id).unwrap());

        bpm.unpin_page(page_id, false);
        assert!(bpm.delete_page(page_id).unwrap());
        assert_eq!(bpm.pin_count(page_id), None);
        assert_eq!(bpm.free_frame_count(), 10);

        // Not resident: vacuous success.
        assert!(bpm.delete_page(page_id).unwrap());
    }
}
