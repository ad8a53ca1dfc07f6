use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::buffer::{BufferPoolManager, Frame, ReadPageGuard, WritePageGuard};
use crate::common::{
    BasaltError, KeyType, PageId, RecordId, Result, HEADER_PAGE_ID, INVALID_PAGE_ID,
};
use crate::concurrency::{RootLatchGuard, Transaction, TreeLatch};
use crate::storage::page::{
    HeaderPage, HeaderPageRef, TreeNode, TreeNodeRef, DEFAULT_INTERNAL_MAX_SIZE,
    DEFAULT_LEAF_MAX_SIZE,
};

use super::{IndexIterator, KeyComparator};

/// A disk-resident B+ tree whose nodes live in buffer-pool pages.
///
/// Concurrency follows latch crabbing. Readers descend with shared page
/// latches, releasing each parent once the child is latched. Writers
/// first run an optimistic pass (shared latches down to the leaf, which
/// is latched exclusively); if the leaf turns out to be unsafe for the
/// operation, everything is released and a pessimistic pass descends with
/// exclusive latches, releasing the prefix of the path above each node
/// that is safe. The tree-global `root` latch guards the root page id and
/// doubles as the entry lock for every descent.
pub struct BPlusTree<C: KeyComparator> {
    index_name: String,
    /// Root latch: protects the root page id
    root: Arc<RwLock<PageId>>,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: usize,
    internal_max_size: usize,
}

impl<C: KeyComparator> BPlusTree<C> {
    /// Opens the index with default node sizes, reading an existing root
    /// for this name from the header page.
    pub fn new(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
    ) -> Result<Self> {
        Self::with_max_sizes(
            name,
            bpm,
            comparator,
            DEFAULT_LEAF_MAX_SIZE,
            DEFAULT_INTERNAL_MAX_SIZE,
        )
    }

    pub fn with_max_sizes(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        assert!(leaf_max_size >= 3, "leaf max size too small");
        assert!(internal_max_size >= 3, "internal max size too small");

        let index_name = name.into();
        let root_pid = {
            let guard = bpm
                .read_page(HEADER_PAGE_ID)?
                .ok_or(BasaltError::BufferPoolFull)?;
            HeaderPageRef::new(guard.data())
                .get_root_id(&index_name)
                .unwrap_or(INVALID_PAGE_ID)
        };

        Ok(Self {
            index_name,
            root: Arc::new(RwLock::new(root_pid)),
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root.read() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root.read()
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Collects every value stored under an exact match of `key`.
    pub fn get_value(&self, key: KeyType) -> Result<Vec<RecordId>> {
        let root_latch = self.root.read();
        let root_pid = *root_latch;
        if root_pid == INVALID_PAGE_ID {
            return Ok(Vec::new());
        }

        let mut guard = self.fetch_read(root_pid)?;
        drop(root_latch);

        loop {
            let next = {
                let node = TreeNodeRef::new(guard.data());
                if node.is_leaf() {
                    let mut result = Vec::new();
                    let mut i = node.leaf_lower_bound(key, &self.comparator);
                    while i < node.size()
                        && self.comparator.compare(node.key_at(i), key) == std::cmp::Ordering::Equal
                    {
                        result.push(node.rid_at(i));
                        i += 1;
                    }
                    return Ok(result);
                }
                let parent_pid = node.page_id();
                let (_, child_pid) = node.internal_child_for(key, &self.comparator);
                (parent_pid, child_pid)
            };

            let child_guard = self.fetch_read(next.1)?;
            assert_eq!(
                TreeNodeRef::new(child_guard.data()).parent_page_id(),
                next.0,
                "corrupted parent pointer on descent"
            );
            // Assigning releases the parent latch after the child's is held.
            guard = child_guard;
        }
    }

    /// Inserts a unique key. Returns false if the key already exists.
    pub fn insert(&self, key: KeyType, rid: RecordId, txn: &mut Transaction) -> Result<bool> {
        if let Some(done) = self.insert_optimistic(key, rid)? {
            return Ok(done);
        }
        self.insert_pessimistic(key, rid, txn)
    }

    /// Removes the entry for `key`, if present.
    pub fn remove(&self, key: KeyType, txn: &mut Transaction) -> Result<()> {
        if self.remove_optimistic(key)?.is_some() {
            return Ok(());
        }
        self.remove_pessimistic(key, txn)
    }

    /// Iterator positioned at the smallest key.
    pub fn begin(&self) -> Result<IndexIterator> {
        let root_latch = self.root.read();
        let root_pid = *root_latch;
        if root_pid == INVALID_PAGE_ID {
            return Ok(self.end());
        }

        let mut guard = self.fetch_read(root_pid)?;
        drop(root_latch);

        loop {
            let child_pid = {
                let node = TreeNodeRef::new(guard.data());
                if node.is_leaf() {
                    break;
                }
                node.child_at(0)
            };
            guard = self.fetch_read(child_pid)?;
        }
        IndexIterator::new(Arc::clone(&self.bpm), Some(guard), 0)
    }

    /// Iterator positioned at the first entry with key >= `key`.
    pub fn begin_at(&self, key: KeyType) -> Result<IndexIterator> {
        let root_latch = self.root.read();
        let root_pid = *root_latch;
        if root_pid == INVALID_PAGE_ID {
            return Ok(self.end());
        }

        let mut guard = self.fetch_read(root_pid)?;
        drop(root_latch);

        loop {
            let child_pid = {
                let node = TreeNodeRef::new(guard.data());
                if node.is_leaf() {
                    break;
                }
                node.internal_child_for(key, &self.comparator).1
            };
            guard = self.fetch_read(child_pid)?;
        }

        let index = TreeNodeRef::new(guard.data()).leaf_lower_bound(key, &self.comparator);
        IndexIterator::new(Arc::clone(&self.bpm), Some(guard), index)
    }

    /// The past-the-end iterator.
    pub fn end(&self) -> IndexIterator {
        IndexIterator::end(Arc::clone(&self.bpm))
    }

    // ------------------------------------------------------------------
    // Write path: optimistic first pass
    // ------------------------------------------------------------------

    /// Shared-latch descent with the leaf latched exclusively. Completes
    /// the insert when the leaf cannot split; `Ok(None)` asks the caller
    /// to restart pessimistically.
    fn insert_optimistic(&self, key: KeyType, rid: RecordId) -> Result<Option<bool>> {
        let root_latch = self.root.read();
        let root_pid = *root_latch;
        if root_pid == INVALID_PAGE_ID {
            // Starting a tree needs the root latch exclusive.
            return Ok(None);
        }

        let first = self.fetch_read(root_pid)?;
        if TreeNodeRef::new(first.data()).is_leaf() {
            // Root is the only node: keep the root latch shared while
            // re-latching it exclusively, so no structural change can
            // slip in between.
            drop(first);
            let mut leaf_guard = self.fetch_write(root_pid)?;
            let safe = {
                let leaf = TreeNodeRef::new(leaf_guard.data());
                leaf.size() + 1 < leaf.max_size()
            };
            if !safe {
                return Ok(None);
            }
            let inserted =
                TreeNode::new(leaf_guard.data_mut()).leaf_insert(key, rid, &self.comparator);
            return Ok(Some(inserted));
        }

        let mut parent_guard = first;
        drop(root_latch);

        loop {
            let (parent_pid, child_pid) = {
                let parent = TreeNodeRef::new(parent_guard.data());
                let (_, child) = parent.internal_child_for(key, &self.comparator);
                (parent.page_id(), child)
            };

            let child_guard = self.fetch_read(child_pid)?;
            let child_is_leaf = {
                let child = TreeNodeRef::new(child_guard.data());
                assert_eq!(
                    child.parent_page_id(),
                    parent_pid,
                    "corrupted parent pointer on descent"
                );
                child.is_leaf()
            };

            if child_is_leaf {
                // Re-latch the leaf exclusively under the parent's shared
                // latch; the leaf's membership cannot change meanwhile.
                drop(child_guard);
                let mut leaf_guard = self.fetch_write(child_pid)?;
                let safe = {
                    let leaf = TreeNodeRef::new(leaf_guard.data());
                    leaf.size() + 1 < leaf.max_size()
                };
                if !safe {
                    return Ok(None);
                }
                let inserted =
                    TreeNode::new(leaf_guard.data_mut()).leaf_insert(key, rid, &self.comparator);
                return Ok(Some(inserted));
            }

            parent_guard = child_guard;
        }
    }

    /// Shared-latch descent for remove; completes when the leaf cannot
    /// underflow. `Ok(None)` asks for a pessimistic restart.
    fn remove_optimistic(&self, key: KeyType) -> Result<Option<()>> {
        let root_latch = self.root.read();
        let root_pid = *root_latch;
        if root_pid == INVALID_PAGE_ID {
            // Nothing to remove.
            return Ok(Some(()));
        }

        let first = self.fetch_read(root_pid)?;
        if TreeNodeRef::new(first.data()).is_leaf() {
            drop(first);
            let mut leaf_guard = self.fetch_write(root_pid)?;
            let safe = TreeNodeRef::new(leaf_guard.data()).size() > 1;
            if !safe {
                return Ok(None);
            }
            TreeNode::new(leaf_guard.data_mut()).leaf_remove(key, &self.comparator);
            return Ok(Some(()));
        }

        let mut parent_guard = first;
        drop(root_latch);

        loop {
            let (parent_pid, child_pid) = {
                let parent = TreeNodeRef::new(parent_guard.data());
                let (_, child) = parent.internal_child_for(key, &self.comparator);
                (parent.page_id(), child)
            };

            let child_guard = self.fetch_read(child_pid)?;
            let child_is_leaf = {
                let child = TreeNodeRef::new(child_guard.data());
                assert_eq!(
                    child.parent_page_id(),
                    parent_pid,
                    "corrupted parent pointer on descent"
                );
                child.is_leaf()
            };

            if child_is_leaf {
                drop(child_guard);
                let mut leaf_guard = self.fetch_write(child_pid)?;
                let safe = {
                    let leaf = TreeNodeRef::new(leaf_guard.data());
                    leaf.size() > leaf.min_size()
                };
                if !safe {
                    return Ok(None);
                }
                TreeNode::new(leaf_guard.data_mut()).leaf_remove(key, &self.comparator);
                return Ok(Some(()));
            }

            parent_guard = child_guard;
        }
    }

    // ------------------------------------------------------------------
    // Write path: pessimistic second pass
    // ------------------------------------------------------------------

    /// Exclusive-latch descent for insert. The transaction's page set
    /// holds the root sentinel plus every still-unsafe node on the path;
    /// whenever a newly latched node is safe the older prefix is released.
    fn insert_pessimistic(
        &self,
        key: KeyType,
        rid: RecordId,
        txn: &mut Transaction,
    ) -> Result<bool> {
        let mut root_guard = RootLatchGuard::acquire(Arc::clone(&self.root));

        if root_guard.root_page_id() == INVALID_PAGE_ID {
            // Start a new tree: a single leaf becomes the root.
            let frame = self.allocate_node()?;
            let pid = frame.page_id();
            {
                let mut data = frame.write_data();
                let mut leaf = TreeNode::new(&mut data[..]);
                leaf.init_leaf(pid, self.leaf_max_size);
                leaf.leaf_insert(key, rid, &self.comparator);
            }
            self.bpm.unpin_page(pid, true);
            root_guard.set_root_page_id(pid);
            self.update_root_record(pid)?;
            debug!("started index '{}' with root {}", self.index_name, pid);
            return Ok(true);
        }

        let mut pid = root_guard.root_page_id();
        let mut prev_pid = INVALID_PAGE_ID;
        txn.push_latch(TreeLatch::Root(root_guard));

        loop {
            let guard = self.fetch_write(pid)?;
            let (safe, next) = {
                let node = TreeNodeRef::new(guard.data());
                assert_eq!(
                    node.parent_page_id(),
                    prev_pid,
                    "corrupted parent pointer on descent"
                );
                if node.is_leaf() {
                    (node.size() + 1 < node.max_size(), None)
                } else {
                    (
                        node.size() < node.max_size(),
                        Some(node.internal_child_for(key, &self.comparator).1),
                    )
                }
            };
            if safe {
                txn.release_all();
            }
            txn.push_latch(TreeLatch::Page(guard));
            match next {
                Some(child) => {
                    prev_pid = pid;
                    pid = child;
                }
                None => break,
            }
        }

        let inserted = {
            let Some(TreeLatch::Page(leaf_guard)) = txn.latches_mut().last_mut() else {
                unreachable!("descent always latches a leaf");
            };
            TreeNode::new(leaf_guard.data_mut()).leaf_insert(key, rid, &self.comparator)
        };
        if !inserted {
            txn.release_all();
            return Ok(false);
        }

        let needs_split = {
            let Some(TreeLatch::Page(leaf_guard)) = txn.latches_mut().last_mut() else {
                unreachable!()
            };
            let leaf = TreeNodeRef::new(leaf_guard.data());
            leaf.size() >= leaf.max_size()
        };
        if needs_split {
            self.split_and_propagate(txn)?;
        }

        txn.release_all();
        Ok(true)
    }

    /// Exclusive-latch descent for remove, with underflow handling.
    fn remove_pessimistic(&self, key: KeyType, txn: &mut Transaction) -> Result<()> {
        let root_guard = RootLatchGuard::acquire(Arc::clone(&self.root));
        if root_guard.root_page_id() == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut pid = root_guard.root_page_id();
        let mut prev_pid = INVALID_PAGE_ID;
        txn.push_latch(TreeLatch::Root(root_guard));

        loop {
            let guard = self.fetch_write(pid)?;
            let (safe, next) = {
                let node = TreeNodeRef::new(guard.data());
                assert_eq!(
                    node.parent_page_id(),
                    prev_pid,
                    "corrupted parent pointer on descent"
                );
                let is_root = prev_pid == INVALID_PAGE_ID;
                let safe = if is_root {
                    if node.is_leaf() {
                        node.size() > 1
                    } else {
                        node.size() > 2
                    }
                } else {
                    node.size() > node.min_size()
                };
                let next = if node.is_leaf() {
                    None
                } else {
                    Some(node.internal_child_for(key, &self.comparator).1)
                };
                (safe, next)
            };
            if safe {
                txn.release_all();
            }
            txn.push_latch(TreeLatch::Page(guard));
            match next {
                Some(child) => {
                    prev_pid = pid;
                    pid = child;
                }
                None => break,
            }
        }

        let removed = {
            let Some(TreeLatch::Page(leaf_guard)) = txn.latches_mut().last_mut() else {
                unreachable!("descent always latches a leaf");
            };
            TreeNode::new(leaf_guard.data_mut()).leaf_remove(key, &self.comparator)
        };

        if removed {
            let (underflow, leaf_idx) = {
                let latches = txn.latches();
                let leaf_idx = latches.len() - 1;
                if leaf_idx == 0 {
                    // Leaf was safe: every ancestor latch was released.
                    (false, leaf_idx)
                } else {
                    let TreeLatch::Page(leaf_guard) = &latches[leaf_idx] else {
                        unreachable!()
                    };
                    let leaf = TreeNodeRef::new(leaf_guard.data());
                    let parent_is_sentinel = matches!(latches[leaf_idx - 1], TreeLatch::Root(_));
                    let underflow = if parent_is_sentinel {
                        leaf.size() == 0
                    } else {
                        leaf.size() < leaf.min_size()
                    };
                    (underflow, leaf_idx)
                }
            };
            if underflow {
                self.handle_underflow(txn, leaf_idx)?;
            }
        }

        txn.release_all();
        for page_id in txn.take_deleted() {
            self.bpm.delete_page(page_id)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Structure changes
    // ------------------------------------------------------------------

    /// Splits the over-full leaf at the end of the page set and pushes
    /// separators upward along the latched path, growing a new root if
    /// the split reaches the sentinel.
    fn split_and_propagate(&self, txn: &mut Transaction) -> Result<()> {
        let (mut separator, mut new_pid) = {
            let Some(TreeLatch::Page(leaf_guard)) = txn.latches_mut().last_mut() else {
                unreachable!()
            };

            let frame = self.allocate_node()?;
            let new_leaf_pid = frame.page_id();
            let separator;
            {
                let mut data = frame.write_data();
                let mut new_leaf = TreeNode::new(&mut data[..]);
                let mut leaf = TreeNode::new(leaf_guard.data_mut());
                new_leaf.init_leaf(new_leaf_pid, leaf.as_ref().max_size());
                new_leaf.set_parent_page_id(leaf.as_ref().parent_page_id());
                separator = leaf.leaf_split_into(&mut new_leaf);
            }
            self.bpm.unpin_page(new_leaf_pid, true);
            debug!(
                "leaf split: new leaf {} separator {}",
                new_leaf_pid, separator
            );
            (separator, new_leaf_pid)
        };

        let mut child_idx = txn.latches().len() - 1;
        loop {
            assert!(child_idx >= 1, "split escaped the latched path");
            let latches = txn.latches_mut();
            let (upper, lower) = latches.split_at_mut(child_idx);

            match &mut upper[child_idx - 1] {
                TreeLatch::Page(parent_guard) => {
                    let overflow = {
                        let mut parent = TreeNode::new(parent_guard.data_mut());
                        parent.internal_insert(separator, new_pid, &self.comparator);
                        parent.as_ref().size() > parent.as_ref().max_size()
                    };
                    if !overflow {
                        break;
                    }
                    let (sep, pid) = self.split_internal(parent_guard, lower)?;
                    separator = sep;
                    new_pid = pid;
                    child_idx -= 1;
                }
                TreeLatch::Root(root_guard) => {
                    // The root itself split: grow the tree by one level.
                    let TreeLatch::Page(old_root_guard) = &mut lower[0] else {
                        unreachable!()
                    };
                    let old_root_pid = root_guard.root_page_id();

                    let frame = self.allocate_node()?;
                    let new_root_pid = frame.page_id();
                    {
                        let mut data = frame.write_data();
                        let mut new_root = TreeNode::new(&mut data[..]);
                        new_root.init_internal(new_root_pid, self.internal_max_size);
                        new_root.populate_new_root(old_root_pid, separator, new_pid);
                    }
                    self.bpm.unpin_page(new_root_pid, true);

                    TreeNode::new(old_root_guard.data_mut()).set_parent_page_id(new_root_pid);
                    self.set_parent_pointer(new_pid, new_root_pid)?;

                    root_guard.set_root_page_id(new_root_pid);
                    self.update_root_record(new_root_pid)?;
                    debug!("root split: new root {}", new_root_pid);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Splits an over-full internal node, reparenting the moved children.
    /// `held` is the latched suffix of the path below the splitting node;
    /// a moved child that sits on it is rewritten through its held latch.
    /// Returns the separator to push up and the new node's page id.
    fn split_internal(
        &self,
        guard: &mut WritePageGuard,
        held: &mut [TreeLatch],
    ) -> Result<(KeyType, PageId)> {
        let frame = self.allocate_node()?;
        let new_pid = frame.page_id();
        let separator;
        {
            let mut data = frame.write_data();
            let mut new_node = TreeNode::new(&mut data[..]);
            let mut old = TreeNode::new(guard.data_mut());
            new_node.init_internal(new_pid, old.as_ref().max_size());
            new_node.set_parent_page_id(old.as_ref().parent_page_id());
            separator = old.internal_split_into(&mut new_node);
        }

        let moved: Vec<PageId> = {
            let data = frame.read_data();
            let view = TreeNodeRef::new(&data[..]);
            (0..view.size()).map(|i| view.child_at(i)).collect()
        };
        self.bpm.unpin_page(new_pid, true);

        for child in moved {
            self.reparent(held, child, new_pid)?;
        }

        debug!(
            "internal split: {} -> {} separator {}",
            guard.page_id(),
            new_pid,
            separator
        );
        Ok((separator, new_pid))
    }

    /// Restores the occupancy invariant of the node at `idx` in the page
    /// set: borrow from a sibling when one can donate, merge otherwise,
    /// recursing into the parent when the merge underflows it. Root
    /// underflow collapses the tree height.
    fn handle_underflow(&self, txn: &mut Transaction, idx: usize) -> Result<()> {
        let parent_is_sentinel = matches!(txn.latches()[idx - 1], TreeLatch::Root(_));

        if parent_is_sentinel {
            return self.collapse_root(txn, idx);
        }

        let recurse = {
            let (latches, deleted) = txn.parts_mut();
            let (upper, lower) = latches.split_at_mut(idx);
            let TreeLatch::Page(parent_guard) = &mut upper[idx - 1] else {
                unreachable!()
            };
            let (node_slot, descendants) = lower.split_at_mut(1);
            let TreeLatch::Page(node_guard) = &mut node_slot[0] else {
                unreachable!()
            };

            let node_pid = node_guard.page_id();
            let (node_idx, left_pid, right_pid) = {
                let parent = TreeNodeRef::new(parent_guard.data());
                let node_idx = parent
                    .index_of_child(node_pid)
                    .expect("node not referenced by its latched parent");
                let left = (node_idx > 0).then(|| parent.child_at(node_idx - 1));
                let right = (node_idx + 1 < parent.size()).then(|| parent.child_at(node_idx + 1));
                (node_idx, left, right)
            };
            assert!(
                left_pid.is_some() || right_pid.is_some(),
                "non-root node {} has no sibling",
                node_pid
            );

            let mut left_guard = match left_pid {
                Some(p) => Some(self.fetch_write(p)?),
                None => None,
            };
            let mut right_guard = match right_pid {
                Some(p) => Some(self.fetch_write(p)?),
                None => None,
            };

            let borrowed = self.try_borrow(
                node_guard,
                parent_guard,
                left_guard.as_mut(),
                right_guard.as_mut(),
                node_idx,
            )?;
            if borrowed {
                false
            } else {
                // Merge right into left: the node folds into its left
                // sibling, or absorbs its right one.
                if let Some(lg) = left_guard.as_mut() {
                    self.merge_nodes(lg, node_guard, parent_guard, node_idx, descendants)?;
                    deleted.push(node_pid);
                } else {
                    let rg = right_guard.as_mut().expect("checked above");
                    self.merge_nodes(node_guard, rg, parent_guard, node_idx + 1, descendants)?;
                    deleted.push(right_pid.expect("checked above"));
                }

                let parent = TreeNodeRef::new(parent_guard.data());
                if parent.is_root() {
                    parent.size() == 1
                } else {
                    parent.size() < parent.min_size()
                }
            }
        };

        if recurse {
            self.handle_underflow(txn, idx - 1)?;
        }
        Ok(())
    }

    /// Root underflow: an empty root leaf empties the tree; a root
    /// internal down to one child promotes that child.
    fn collapse_root(&self, txn: &mut Transaction, idx: usize) -> Result<()> {
        let action = {
            let latches = txn.latches();
            let TreeLatch::Page(node_guard) = &latches[idx] else {
                unreachable!()
            };
            let node = TreeNodeRef::new(node_guard.data());
            if node.is_leaf() && node.size() == 0 {
                Some((INVALID_PAGE_ID, node.page_id()))
            } else if !node.is_leaf() && node.size() == 1 {
                Some((node.child_at(0), node.page_id()))
            } else {
                None
            }
        };

        let Some((new_root, old_root)) = action else {
            return Ok(());
        };

        if new_root != INVALID_PAGE_ID {
            // The promoted child may itself still be latched on the path.
            let latches = txn.latches_mut();
            let held = &mut latches[idx + 1..];
            self.reparent(held, new_root, INVALID_PAGE_ID)?;
        }

        {
            let latches = txn.latches_mut();
            let TreeLatch::Root(root_guard) = &mut latches[idx - 1] else {
                unreachable!()
            };
            root_guard.set_root_page_id(new_root);
        }
        self.update_root_record(new_root)?;
        txn.mark_deleted(old_root);
        debug!("root collapse: {} -> {}", old_root, new_root);
        Ok(())
    }

    /// Moves one entry from a sibling that can spare it, updating the
    /// parent separator. Prefers the left sibling. Returns false when
    /// neither sibling can donate.
    fn try_borrow(
        &self,
        node_guard: &mut WritePageGuard,
        parent_guard: &mut WritePageGuard,
        left_guard: Option<&mut WritePageGuard>,
        right_guard: Option<&mut WritePageGuard>,
        node_idx: usize,
    ) -> Result<bool> {
        let node_pid = node_guard.page_id();
        let is_leaf = TreeNodeRef::new(node_guard.data()).is_leaf();

        if let Some(lg) = left_guard {
            let can_donate = {
                let donor = TreeNodeRef::new(lg.data());
                donor.size() > donor.min_size()
            };
            if can_donate {
                if is_leaf {
                    let (key, rid) = {
                        let donor = TreeNodeRef::new(lg.data());
                        (donor.key_at(donor.size() - 1), donor.rid_at(donor.size() - 1))
                    };
                    {
                        let mut donor = TreeNode::new(lg.data_mut());
                        let last = donor.as_ref().size() - 1;
                        donor.leaf_remove_at(last);
                    }
                    TreeNode::new(node_guard.data_mut()).leaf_insert(key, rid, &self.comparator);
                    TreeNode::new(parent_guard.data_mut()).set_key_at(node_idx, key);
                } else {
                    let (moved_key, moved_child) = {
                        let donor = TreeNodeRef::new(lg.data());
                        (donor.key_at(donor.size() - 1), donor.child_at(donor.size() - 1))
                    };
                    let parent_sep = TreeNodeRef::new(parent_guard.data()).key_at(node_idx);
                    {
                        let mut node = TreeNode::new(node_guard.data_mut());
                        node.internal_insert_at(0, 0, moved_child);
                        node.set_key_at(1, parent_sep);
                    }
                    {
                        let mut donor = TreeNode::new(lg.data_mut());
                        let last = donor.as_ref().size() - 1;
                        donor.internal_remove_at(last);
                    }
                    TreeNode::new(parent_guard.data_mut()).set_key_at(node_idx, moved_key);
                    self.set_parent_pointer(moved_child, node_pid)?;
                }
                debug!("borrowed from left sibling into {}", node_pid);
                return Ok(true);
            }
        }

        if let Some(rg) = right_guard {
            let can_donate = {
                let donor = TreeNodeRef::new(rg.data());
                donor.size() > donor.min_size()
            };
            if can_donate {
                if is_leaf {
                    let (key, rid) = {
                        let donor = TreeNodeRef::new(rg.data());
                        (donor.key_at(0), donor.rid_at(0))
                    };
                    TreeNode::new(rg.data_mut()).leaf_remove_at(0);
                    TreeNode::new(node_guard.data_mut()).leaf_insert(key, rid, &self.comparator);
                    let new_first = TreeNodeRef::new(rg.data()).key_at(0);
                    TreeNode::new(parent_guard.data_mut()).set_key_at(node_idx + 1, new_first);
                } else {
                    let (next_sep, moved_child) = {
                        let donor = TreeNodeRef::new(rg.data());
                        (donor.key_at(1), donor.child_at(0))
                    };
                    let parent_sep = TreeNodeRef::new(parent_guard.data()).key_at(node_idx + 1);
                    {
                        let mut node = TreeNode::new(node_guard.data_mut());
                        let size = node.as_ref().size();
                        node.internal_insert_at(size, parent_sep, moved_child);
                    }
                    TreeNode::new(rg.data_mut()).internal_remove_at(0);
                    TreeNode::new(parent_guard.data_mut()).set_key_at(node_idx + 1, next_sep);
                    self.set_parent_pointer(moved_child, node_pid)?;
                }
                debug!("borrowed from right sibling into {}", node_pid);
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Folds `right` into `left` and drops the separator entry from the
    /// parent. `right_idx` is the right node's slot in the parent; `held`
    /// is the latched path below the merging level, so a moved child that
    /// is still latched gets its parent pointer rewritten in place.
    fn merge_nodes(
        &self,
        left: &mut WritePageGuard,
        right: &mut WritePageGuard,
        parent: &mut WritePageGuard,
        right_idx: usize,
        held: &mut [TreeLatch],
    ) -> Result<()> {
        let left_pid = left.page_id();
        let is_leaf = TreeNodeRef::new(left.data()).is_leaf();

        if is_leaf {
            let right_view = TreeNodeRef::new(right.data());
            TreeNode::new(left.data_mut()).leaf_merge_from(&right_view);
        } else {
            let parent_sep = TreeNodeRef::new(parent.data()).key_at(right_idx);
            let moved: Vec<(KeyType, PageId)> = {
                let view = TreeNodeRef::new(right.data());
                (0..view.size())
                    .map(|i| {
                        let key = if i == 0 { parent_sep } else { view.key_at(i) };
                        (key, view.child_at(i))
                    })
                    .collect()
            };
            {
                let mut left_node = TreeNode::new(left.data_mut());
                for &(key, child) in &moved {
                    let size = left_node.as_ref().size();
                    left_node.internal_insert_at(size, key, child);
                }
            }
            for &(_, child) in &moved {
                self.reparent(held, child, left_pid)?;
            }
        }

        TreeNode::new(parent.data_mut()).internal_remove_at(right_idx);
        debug!("merged {} into {}", right.page_id(), left_pid);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn allocate_node(&self) -> Result<Arc<Frame>> {
        self.bpm.new_page()?.ok_or(BasaltError::BufferPoolFull)
    }

    fn fetch_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        self.bpm
            .read_page(page_id)?
            .ok_or(BasaltError::BufferPoolFull)
    }

    fn fetch_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        self.bpm
            .write_page(page_id)?
            .ok_or(BasaltError::BufferPoolFull)
    }

    /// Rewrites a child's parent back-reference through the buffer pool.
    fn set_parent_pointer(&self, child: PageId, parent: PageId) -> Result<()> {
        let mut guard = self.fetch_write(child)?;
        TreeNode::new(guard.data_mut()).set_parent_page_id(parent);
        Ok(())
    }

    /// Like `set_parent_pointer`, but writes through an already-held
    /// latch when the child is part of the latched path, instead of
    /// re-latching a page this operation is still holding.
    fn reparent(&self, held: &mut [TreeLatch], child: PageId, parent: PageId) -> Result<()> {
        for latch in held.iter_mut() {
            if let TreeLatch::Page(guard) = latch {
                if guard.page_id() == child {
                    TreeNode::new(guard.data_mut()).set_parent_page_id(parent);
                    return Ok(());
                }
            }
        }
        self.set_parent_pointer(child, parent)
    }

    /// Records the root page id under this index's name in the header
    /// page, inserting the record on first use and updating it afterwards.
    fn update_root_record(&self, root_pid: PageId) -> Result<()> {
        let mut guard = self.fetch_write(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());
        if !header.update_record(&self.index_name, root_pid)
            && !header.insert_record(&self.index_name, root_pid)
        {
            return Err(BasaltError::HeaderPageFull);
        }
        Ok(())
    }
}
