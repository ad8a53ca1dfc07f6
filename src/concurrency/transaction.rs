use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};

use crate::buffer::WritePageGuard;
use crate::common::PageId;

/// Owned exclusive guard over a tree's root latch. The latch protects
/// the root page id; holding it exclusively blocks every new descent.
pub struct RootLatchGuard {
    guard: Option<RwLockWriteGuard<'static, PageId>>,
    /// Keeps the latch alive for the guard's lifetime
    _root: Arc<RwLock<PageId>>,
}

impl RootLatchGuard {
    /// Acquires the root latch exclusively.
    pub(crate) fn acquire(root: Arc<RwLock<PageId>>) -> Self {
        let guard = root.write();
        // Transmute to static lifetime - the latch is kept alive via Arc
        let guard: RwLockWriteGuard<'static, PageId> = unsafe { std::mem::transmute(guard) };
        Self {
            guard: Some(guard),
            _root: root,
        }
    }

    pub fn root_page_id(&self) -> PageId {
        **self.guard.as_ref().unwrap()
    }

    pub fn set_root_page_id(&mut self, page_id: PageId) {
        **self.guard.as_mut().unwrap() = page_id;
    }
}

impl Drop for RootLatchGuard {
    fn drop(&mut self) {
        self.guard.take();
    }
}

/// One element of a transaction's latched-page set: either the root-latch
/// sentinel or an exclusively latched tree node.
pub enum TreeLatch {
    Root(RootLatchGuard),
    Page(WritePageGuard),
}

/// Bookkeeping collaborator for a single index operation. Holds the
/// ordered set of latches taken on the descent (the root sentinel first)
/// and the pages vacated by merges, which the tree hands to the buffer
/// pool only after every latch has been released.
#[derive(Default)]
pub struct Transaction {
    page_set: Vec<TreeLatch>,
    deleted_pages: Vec<PageId>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_latch(&mut self, latch: TreeLatch) {
        self.page_set.push(latch);
    }

    pub fn latches(&self) -> &[TreeLatch] {
        &self.page_set
    }

    pub fn latches_mut(&mut self) -> &mut Vec<TreeLatch> {
        &mut self.page_set
    }

    /// Both sets at once, for callers juggling latches and deletions.
    pub fn parts_mut(&mut self) -> (&mut Vec<TreeLatch>, &mut Vec<PageId>) {
        (&mut self.page_set, &mut self.deleted_pages)
    }

    /// Releases every held latch in descent order (oldest first).
    pub fn release_all(&mut self) {
        self.page_set.drain(..);
    }

    pub fn mark_deleted(&mut self, page_id: PageId) {
        self.deleted_pages.push(page_id);
    }

    pub fn take_deleted(&mut self) -> Vec<PageId> {
        std::mem::take(&mut self.deleted_pages)
    }
}
