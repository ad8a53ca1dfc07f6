use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard};
use crate::common::{BasaltError, KeyType, PageId, RecordId, Result, INVALID_PAGE_ID};
use crate::storage::page::TreeNodeRef;

/// Forward iterator over the leaf chain, in comparator order.
///
/// The current leaf stays pinned and read-latched for as long as the
/// iterator points into it; advancing past its last entry releases it
/// before the next leaf is fetched, so the iterator never holds two
/// leaves at once. Iteration is not a snapshot: leaves already passed
/// may change behind the iterator.
pub struct IndexIterator {
    bpm: Arc<BufferPoolManager>,
    guard: Option<ReadPageGuard>,
    index: usize,
}

impl IndexIterator {
    pub(crate) fn new(
        bpm: Arc<BufferPoolManager>,
        guard: Option<ReadPageGuard>,
        index: usize,
    ) -> Result<Self> {
        let mut iter = Self { bpm, guard, index };
        iter.skip_exhausted_leaves()?;
        Ok(iter)
    }

    pub(crate) fn end(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            guard: None,
            index: 0,
        }
    }

    pub fn is_end(&self) -> bool {
        self.guard.is_none()
    }

    /// Page id of the current leaf, or INVALID at the end.
    pub fn page_id(&self) -> PageId {
        self.guard
            .as_ref()
            .map(|g| g.page_id())
            .unwrap_or(INVALID_PAGE_ID)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// The entry under the cursor, or None at the end.
    pub fn current(&self) -> Option<(KeyType, RecordId)> {
        let guard = self.guard.as_ref()?;
        let node = TreeNodeRef::new(guard.data());
        debug_assert!(self.index < node.size());
        Some((node.key_at(self.index), node.rid_at(self.index)))
    }

    /// Moves the cursor one entry forward, following the sibling chain
    /// across leaf boundaries.
    pub fn advance(&mut self) -> Result<()> {
        if self.guard.is_none() {
            return Ok(());
        }
        self.index += 1;
        self.skip_exhausted_leaves()
    }

    fn skip_exhausted_leaves(&mut self) -> Result<()> {
        loop {
            let next = {
                let Some(guard) = self.guard.as_ref() else {
                    return Ok(());
                };
                let node = TreeNodeRef::new(guard.data());
                if self.index < node.size() {
                    return Ok(());
                }
                node.next_page_id()
            };

            // Release the exhausted leaf before touching its successor.
            self.guard = None;
            self.index = 0;
            if next == INVALID_PAGE_ID {
                return Ok(());
            }
            let guard = self
                .bpm
                .read_page(next)?
                .ok_or(BasaltError::BufferPoolFull)?;
            if !TreeNodeRef::new(guard.data()).is_leaf() {
                // The successor was merged away and its page deallocated
                // after the predecessor's latch was dropped; the scan
                // ends rather than walking reclaimed storage.
                return Ok(());
            }
            self.guard = Some(guard);
        }
    }
}

impl PartialEq for IndexIterator {
    fn eq(&self, other: &Self) -> bool {
        self.page_id() == other.page_id() && self.index == other.index
    }
}

impl Iterator for IndexIterator {
    type Item = Result<(KeyType, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.current()?;
        match self.advance() {
            Ok(()) => Some(Ok(item)),
            Err(e) => Some(Err(e)),
        }
    }
}
