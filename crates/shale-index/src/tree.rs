//! B+ tree operations: lookup, unique-key insertion with node splits, and
//! deletion with redistribution, merging, and root collapse.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use shale_buffer::BufferPoolManager;
use shale_common::{PageId, Result, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID};

use crate::header::HeaderPage;
use crate::iterator::IndexIterator;
use crate::node::{self, InternalNode, LeafNode, NodeType, INTERNAL_CAPACITY, LEAF_CAPACITY};

/// Configuration for a B+ tree index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BTreeConfig {
    /// Maximum entries per leaf page.
    pub leaf_max_size: u32,
    /// Maximum children per internal page.
    pub internal_max_size: u32,
}

impl Default for BTreeConfig {
    fn default() -> Self {
        Self {
            leaf_max_size: LEAF_CAPACITY as u32,
            internal_max_size: INTERNAL_CAPACITY as u32,
        }
    }
}

/// A B+ tree index over the buffer pool.
///
/// Keys are unique `i64`s, values are [`Rid`]s. Internal pages route
/// searches; leaf pages hold the entries and chain together in key order.
/// The root page id is persisted in the header page (page id 0) on every
/// root change and recovered on open.
///
/// The tree performs no page latching of its own beyond the buffer pool's
/// pins: a mutex guards the root page id, and each public operation holds it
/// end to end, so operations on one tree are serialised. Concurrent readers
/// of distinct trees over a shared pool are fine.
pub struct BPlusTree {
    index_name: String,
    bpm: Arc<BufferPoolManager>,
    root_page_id: Mutex<PageId>,
    leaf_max_size: u32,
    internal_max_size: u32,
}

impl BPlusTree {
    /// Opens an index, recovering its root page id from the header page if
    /// this index has persisted one before.
    pub fn new(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        config: BTreeConfig,
    ) -> Result<Self> {
        let index_name = index_name.into();
        assert!(
            (2..=LEAF_CAPACITY as u32).contains(&config.leaf_max_size),
            "leaf_max_size {} out of range",
            config.leaf_max_size
        );
        assert!(
            (3..=INTERNAL_CAPACITY as u32).contains(&config.internal_max_size),
            "internal_max_size {} out of range",
            config.internal_max_size
        );

        let root = {
            let guard = bpm.fetch_page(HEADER_PAGE_ID)?;
            let header = HeaderPage::from_bytes(&guard.data()[..]);
            header.get_root_id(&index_name).unwrap_or(INVALID_PAGE_ID)
        };

        Ok(Self {
            index_name,
            bpm,
            root_page_id: Mutex::new(root),
            leaf_max_size: config.leaf_max_size,
            internal_max_size: config.internal_max_size,
        })
    }

    /// Returns the index name.
    pub fn name(&self) -> &str {
        &self.index_name
    }

    /// Returns true if the tree holds no keys.
    pub fn is_empty(&self) -> bool {
        *self.root_page_id.lock() == INVALID_PAGE_ID
    }

    /// Returns the current root page id (INVALID_PAGE_ID when empty).
    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.lock()
    }

    /// Point lookup.
    pub fn get_value(&self, key: i64) -> Result<Option<Rid>> {
        let root = self.root_page_id.lock();
        self.lookup(*root, key)
    }

    fn lookup(&self, root: PageId, key: i64) -> Result<Option<Rid>> {
        if root == INVALID_PAGE_ID {
            return Ok(None);
        }
        let leaf_id = self.find_leaf_page(root, key)?;
        let guard = self.bpm.fetch_page(leaf_id)?;
        let leaf = LeafNode::from_bytes(&guard.data()[..]);
        Ok(leaf.lookup(key))
    }

    /// Descends from `root` to the leaf responsible for `key`. Each level's
    /// pin is released as the descent moves down.
    fn find_leaf_page(&self, root: PageId, key: i64) -> Result<PageId> {
        let mut page_id = root;
        loop {
            let guard = self.bpm.fetch_page(page_id)?;
            let data = guard.data();
            match node::page_type(&data[..])? {
                NodeType::Leaf => return Ok(page_id),
                NodeType::Internal => {
                    page_id = InternalNode::from_bytes(&data[..]).lookup_child(key);
                }
            }
        }
    }

    /// Inserts a key-value pair. Returns Ok(false) if the key already
    /// exists (unique-key semantics).
    pub fn insert(&self, key: i64, rid: Rid) -> Result<bool> {
        let mut root = self.root_page_id.lock();

        if *root == INVALID_PAGE_ID {
            let guard = self.bpm.new_page()?;
            let page_id = guard.page_id();
            let mut leaf = LeafNode::new(page_id, INVALID_PAGE_ID, self.leaf_max_size);
            leaf.insert(key, rid);
            guard.data_mut().copy_from_slice(leaf.as_bytes());
            guard.mark_dirty();
            drop(guard);

            *root = page_id;
            self.save_root(*root)?;
            log::debug!(
                "btree '{}': started new tree at root {}",
                self.index_name,
                page_id
            );
            return Ok(true);
        }

        if self.lookup(*root, key)?.is_some() {
            return Ok(false);
        }
        self.insert_into_leaf(&mut root, key, rid)?;
        Ok(true)
    }

    fn insert_into_leaf(&self, root: &mut PageId, key: i64, rid: Rid) -> Result<()> {
        let leaf_id = self.find_leaf_page(*root, key)?;
        let guard = self.bpm.fetch_page_mut(leaf_id)?;
        let mut leaf = LeafNode::from_bytes(&guard.data()[..]);
        leaf.insert(key, rid);

        if leaf.size() < leaf.max_size() {
            guard.data_mut().copy_from_slice(leaf.as_bytes());
            guard.mark_dirty();
            return Ok(());
        }

        // Full: split off a right sibling taking the upper half and link it
        // into the leaf chain.
        let new_guard = self.bpm.new_page()?;
        let new_page_id = new_guard.page_id();
        let mut new_leaf = LeafNode::new(new_page_id, leaf.parent_page_id(), self.leaf_max_size);

        let old_size = leaf.size();
        let half = old_size / 2;
        for i in half..old_size {
            new_leaf.push_back(leaf.key_at(i), leaf.rid_at(i));
        }
        leaf.set_size(half);
        new_leaf.set_next_page_id(leaf.next_page_id());
        leaf.set_next_page_id(new_page_id);
        let separator = new_leaf.key_at(0);

        guard.data_mut().copy_from_slice(leaf.as_bytes());
        guard.mark_dirty();
        new_guard.data_mut().copy_from_slice(new_leaf.as_bytes());
        new_guard.mark_dirty();
        drop(guard);
        drop(new_guard);
        log::debug!(
            "btree '{}': split leaf {} -> {} at key {}",
            self.index_name,
            leaf_id,
            new_page_id,
            separator
        );

        self.insert_into_parent(root, leaf_id, separator, new_page_id)
    }

    /// Links a freshly split-off sibling into the parent level, splitting
    /// upward as needed. Recursion is bounded by the tree height.
    fn insert_into_parent(
        &self,
        root: &mut PageId,
        old_page_id: PageId,
        separator: i64,
        new_page_id: PageId,
    ) -> Result<()> {
        if old_page_id == *root {
            let root_guard = self.bpm.new_page()?;
            let new_root_id = root_guard.page_id();
            let mut new_root =
                InternalNode::new(new_root_id, INVALID_PAGE_ID, self.internal_max_size);
            new_root.set_child0(old_page_id);
            new_root.push_back(separator, new_page_id);
            root_guard.data_mut().copy_from_slice(new_root.as_bytes());
            root_guard.mark_dirty();
            drop(root_guard);

            self.set_parent(old_page_id, new_root_id)?;
            self.set_parent(new_page_id, new_root_id)?;
            *root = new_root_id;
            self.save_root(*root)?;
            log::debug!(
                "btree '{}': height grew, new root {}",
                self.index_name,
                new_root_id
            );
            return Ok(());
        }

        let parent_id = {
            let guard = self.bpm.fetch_page(old_page_id)?;
            let parent_id = node::parent_page_id_of(&guard.data()[..]);
            parent_id
        };
        let parent_guard = self.bpm.fetch_page_mut(parent_id)?;
        let mut parent = InternalNode::from_bytes(&parent_guard.data()[..]);

        if parent.size() < parent.max_size() {
            parent.insert(separator, new_page_id);
            parent_guard.data_mut().copy_from_slice(parent.as_bytes());
            parent_guard.mark_dirty();
            drop(parent_guard);
            self.set_parent(new_page_id, parent_id)?;
            return Ok(());
        }

        // The parent would overflow. Stage the insertion in a scratch
        // buffer sized for one extra entry, then split the staged entries:
        // the left half stays in the parent page, the upper half moves to a
        // fresh sibling whose slot-0 key is the separator to promote.
        let mut entries = parent.entries();
        let pos = entries[1..]
            .iter()
            .position(|&(k, _)| k > separator)
            .map(|p| p + 1)
            .unwrap_or(entries.len());
        entries.insert(pos, (separator, new_page_id));

        let total = entries.len();
        let half = 1 + (total - 1) / 2;
        let right_entries = entries.split_off(half);

        parent.set_entries(&entries);

        let sibling_guard = self.bpm.new_page()?;
        let sibling_id = sibling_guard.page_id();
        let mut sibling =
            InternalNode::new(sibling_id, parent.parent_page_id(), self.internal_max_size);
        sibling.set_entries(&right_entries);
        let promoted = right_entries[0].0;

        parent_guard.data_mut().copy_from_slice(parent.as_bytes());
        parent_guard.mark_dirty();
        sibling_guard.data_mut().copy_from_slice(sibling.as_bytes());
        sibling_guard.mark_dirty();
        drop(parent_guard);
        drop(sibling_guard);

        for &(_, child) in &right_entries {
            self.set_parent(child, sibling_id)?;
        }
        if right_entries.iter().all(|&(_, c)| c != new_page_id) {
            self.set_parent(new_page_id, parent_id)?;
        }
        log::debug!(
            "btree '{}': split internal {} -> {}, promoting key {}",
            self.index_name,
            parent_id,
            sibling_id,
            promoted
        );

        self.insert_into_parent(root, parent_id, promoted, sibling_id)
    }

    /// Removes a key, rebalancing underfull nodes by redistribution or
    /// merging. Removing an absent key is a no-op.
    pub fn remove(&self, key: i64) -> Result<()> {
        let mut root = self.root_page_id.lock();
        if *root == INVALID_PAGE_ID {
            return Ok(());
        }

        let leaf_id = self.find_leaf_page(*root, key)?;
        let guard = self.bpm.fetch_page_mut(leaf_id)?;
        let mut leaf = LeafNode::from_bytes(&guard.data()[..]);

        let was_first = leaf.size() > 0 && leaf.key_at(0) == key;
        if !leaf.remove(key) {
            return Ok(());
        }
        guard.data_mut().copy_from_slice(leaf.as_bytes());
        guard.mark_dirty();

        if leaf_id == *root {
            // The root leaf is exempt from min_size, but an emptied tree
            // drops its last page.
            if leaf.size() == 0 {
                drop(guard);
                self.bpm.delete_page(leaf_id)?;
                *root = INVALID_PAGE_ID;
                self.save_root(*root)?;
                log::debug!("btree '{}': tree emptied", self.index_name);
            }
            return Ok(());
        }

        // Deleting a leaf's first key leaves the parent separator stale;
        // refresh it one level up. Internal separators further up only need
        // to route correctly, so no cascade.
        if was_first && leaf.size() > 0 {
            self.refresh_separator(leaf_id, leaf.parent_page_id(), leaf.key_at(0))?;
        }

        if leaf.size() >= leaf.min_size() {
            return Ok(());
        }
        drop(guard);
        self.rebalance(&mut root, leaf_id)
    }

    fn refresh_separator(
        &self,
        child_id: PageId,
        parent_id: PageId,
        new_key: i64,
    ) -> Result<()> {
        let guard = self.bpm.fetch_page_mut(parent_id)?;
        let mut parent = InternalNode::from_bytes(&guard.data()[..]);
        if let Some(slot) = parent.child_index_of(child_id) {
            if slot >= 1 {
                parent.set_key_at(slot, new_key);
                guard.data_mut().copy_from_slice(parent.as_bytes());
                guard.mark_dirty();
            }
        }
        Ok(())
    }

    /// Restores the min-size invariant for an underfull node: collapse the
    /// root, or redistribute from a sibling, or merge with one.
    fn rebalance(&self, root: &mut PageId, page_id: PageId) -> Result<()> {
        if page_id == *root {
            return self.collapse_root(root);
        }
        if self.redistribute(page_id)? {
            return Ok(());
        }
        self.merge(root, page_id)
    }

    /// An internal root with a single child promotes that child.
    fn collapse_root(&self, root: &mut PageId) -> Result<()> {
        let only_child = {
            let guard = self.bpm.fetch_page(*root)?;
            let data = guard.data();
            match node::page_type(&data[..])? {
                NodeType::Internal => {
                    let node = InternalNode::from_bytes(&data[..]);
                    (node.size() == 1).then(|| node.child_at(0))
                }
                NodeType::Leaf => None,
            }
        };

        if let Some(child) = only_child {
            let old_root = *root;
            self.set_parent(child, INVALID_PAGE_ID)?;
            self.bpm.delete_page(old_root)?;
            *root = child;
            self.save_root(*root)?;
            log::debug!(
                "btree '{}': root collapsed {} -> {}",
                self.index_name,
                old_root,
                child
            );
        }
        Ok(())
    }

    /// Tries to borrow one entry from a sibling, preferring the left one.
    /// Returns Ok(false) when neither sibling can spare an entry.
    fn redistribute(&self, page_id: PageId) -> Result<bool> {
        let (parent_id, node_type) = {
            let guard = self.bpm.fetch_page(page_id)?;
            let data = guard.data();
            (node::parent_page_id_of(&data[..]), node::page_type(&data[..])?)
        };
        let parent_guard = self.bpm.fetch_page_mut(parent_id)?;
        let mut parent = InternalNode::from_bytes(&parent_guard.data()[..]);
        let slot = parent
            .child_index_of(page_id)
            .expect("node missing from its parent during redistribution");

        match node_type {
            NodeType::Leaf => {
                let node_guard = self.bpm.fetch_page_mut(page_id)?;
                let mut node = LeafNode::from_bytes(&node_guard.data()[..]);

                if slot > 0 {
                    let left_id = parent.child_at(slot - 1);
                    let left_guard = self.bpm.fetch_page_mut(left_id)?;
                    let mut left = LeafNode::from_bytes(&left_guard.data()[..]);
                    if left.size() > left.min_size() {
                        let (key, rid) = left.pop_back();
                        node.push_front(key, rid);
                        parent.set_key_at(slot, key);

                        left_guard.data_mut().copy_from_slice(left.as_bytes());
                        left_guard.mark_dirty();
                        node_guard.data_mut().copy_from_slice(node.as_bytes());
                        node_guard.mark_dirty();
                        parent_guard.data_mut().copy_from_slice(parent.as_bytes());
                        parent_guard.mark_dirty();
                        return Ok(true);
                    }
                }
                if slot + 1 < parent.size() {
                    let right_id = parent.child_at(slot + 1);
                    let right_guard = self.bpm.fetch_page_mut(right_id)?;
                    let mut right = LeafNode::from_bytes(&right_guard.data()[..]);
                    if right.size() > right.min_size() {
                        let (key, rid) = right.pop_front();
                        node.push_back(key, rid);
                        parent.set_key_at(slot + 1, right.key_at(0));

                        right_guard.data_mut().copy_from_slice(right.as_bytes());
                        right_guard.mark_dirty();
                        node_guard.data_mut().copy_from_slice(node.as_bytes());
                        node_guard.mark_dirty();
                        parent_guard.data_mut().copy_from_slice(parent.as_bytes());
                        parent_guard.mark_dirty();
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            NodeType::Internal => {
                let node_guard = self.bpm.fetch_page_mut(page_id)?;
                let mut node = InternalNode::from_bytes(&node_guard.data()[..]);

                if slot > 0 {
                    let left_id = parent.child_at(slot - 1);
                    let left_guard = self.bpm.fetch_page_mut(left_id)?;
                    let mut left = InternalNode::from_bytes(&left_guard.data()[..]);
                    if left.size() > left.min_size() {
                        // The donor's last child moves over; the parent
                        // separator rotates down to label the old first
                        // child, and the donor's endpoint key rises.
                        let separator = parent.key_at(slot);
                        let (donor_key, donor_child) = left.pop_back();
                        node.push_front(0, donor_child);
                        node.set_key_at(1, separator);
                        parent.set_key_at(slot, donor_key);

                        left_guard.data_mut().copy_from_slice(left.as_bytes());
                        left_guard.mark_dirty();
                        node_guard.data_mut().copy_from_slice(node.as_bytes());
                        node_guard.mark_dirty();
                        parent_guard.data_mut().copy_from_slice(parent.as_bytes());
                        parent_guard.mark_dirty();
                        drop(left_guard);
                        drop(node_guard);
                        drop(parent_guard);
                        self.set_parent(donor_child, page_id)?;
                        return Ok(true);
                    }
                }
                if slot + 1 < parent.size() {
                    let right_id = parent.child_at(slot + 1);
                    let right_guard = self.bpm.fetch_page_mut(right_id)?;
                    let mut right = InternalNode::from_bytes(&right_guard.data()[..]);
                    if right.size() > right.min_size() {
                        // The donor's first child moves over, labelled by
                        // the old separator; the donor's next key rises.
                        let separator = parent.key_at(slot + 1);
                        let rising = right.key_at(1);
                        let (_, moved_child) = right.pop_front();
                        node.push_back(separator, moved_child);
                        parent.set_key_at(slot + 1, rising);

                        right_guard.data_mut().copy_from_slice(right.as_bytes());
                        right_guard.mark_dirty();
                        node_guard.data_mut().copy_from_slice(node.as_bytes());
                        node_guard.mark_dirty();
                        parent_guard.data_mut().copy_from_slice(parent.as_bytes());
                        parent_guard.mark_dirty();
                        drop(right_guard);
                        drop(node_guard);
                        drop(parent_guard);
                        self.set_parent(moved_child, page_id)?;
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    /// Merges an underfull node with a sibling (absorbing into the left one
    /// when it exists), removes the separator from the parent, and
    /// rebalances upward when the parent under-fills.
    fn merge(&self, root: &mut PageId, page_id: PageId) -> Result<()> {
        let (parent_id, node_type) = {
            let guard = self.bpm.fetch_page(page_id)?;
            let data = guard.data();
            (node::parent_page_id_of(&data[..]), node::page_type(&data[..])?)
        };
        let parent_guard = self.bpm.fetch_page_mut(parent_id)?;
        let mut parent = InternalNode::from_bytes(&parent_guard.data()[..]);
        let slot = parent
            .child_index_of(page_id)
            .expect("node missing from its parent during merge");

        // The right-hand node of the pair empties into the left-hand one.
        let (survivor_id, victim_id, victim_slot) = if slot > 0 {
            (parent.child_at(slot - 1), page_id, slot)
        } else {
            (page_id, parent.child_at(slot + 1), slot + 1)
        };
        let separator = parent.key_at(victim_slot);

        match node_type {
            NodeType::Leaf => {
                let survivor_guard = self.bpm.fetch_page_mut(survivor_id)?;
                let victim_guard = self.bpm.fetch_page_mut(victim_id)?;
                let mut survivor = LeafNode::from_bytes(&survivor_guard.data()[..]);
                let mut victim = LeafNode::from_bytes(&victim_guard.data()[..]);

                for i in 0..victim.size() {
                    survivor.push_back(victim.key_at(i), victim.rid_at(i));
                }
                survivor.set_next_page_id(victim.next_page_id());
                victim.set_size(0);

                survivor_guard
                    .data_mut()
                    .copy_from_slice(survivor.as_bytes());
                survivor_guard.mark_dirty();
                victim_guard.data_mut().copy_from_slice(victim.as_bytes());
                victim_guard.mark_dirty();
            }
            NodeType::Internal => {
                let survivor_guard = self.bpm.fetch_page_mut(survivor_id)?;
                let victim_guard = self.bpm.fetch_page_mut(victim_id)?;
                let mut survivor = InternalNode::from_bytes(&survivor_guard.data()[..]);
                let mut victim = InternalNode::from_bytes(&victim_guard.data()[..]);

                // The separator routes the victim's first child after the
                // concatenation.
                victim.set_key_at(0, separator);
                let moved = victim.entries();
                for &(key, child) in &moved {
                    survivor.push_back(key, child);
                }
                victim.set_size(0);

                survivor_guard
                    .data_mut()
                    .copy_from_slice(survivor.as_bytes());
                survivor_guard.mark_dirty();
                victim_guard.data_mut().copy_from_slice(victim.as_bytes());
                victim_guard.mark_dirty();
                drop(survivor_guard);
                drop(victim_guard);

                for &(_, child) in &moved {
                    self.set_parent(child, survivor_id)?;
                }
            }
        }

        parent.remove_at(victim_slot);
        parent_guard.data_mut().copy_from_slice(parent.as_bytes());
        parent_guard.mark_dirty();
        let parent_size = parent.size();
        let parent_min = parent.min_size();
        drop(parent_guard);

        self.bpm.delete_page(victim_id)?;
        log::debug!(
            "btree '{}': merged {} into {}",
            self.index_name,
            victim_id,
            survivor_id
        );

        if parent_id == *root {
            return self.collapse_root(root);
        }
        if parent_size < parent_min {
            return self.rebalance(root, parent_id);
        }
        Ok(())
    }

    /// Rewrites one node's parent pointer.
    fn set_parent(&self, page_id: PageId, parent_page_id: PageId) -> Result<()> {
        let guard = self.bpm.fetch_page_mut(page_id)?;
        {
            let mut data = guard.data_mut();
            node::write_parent_page_id(&mut data[..], parent_page_id);
        }
        guard.mark_dirty();
        Ok(())
    }

    /// Persists the root page id in the header page.
    fn save_root(&self, root: PageId) -> Result<()> {
        let guard = self.bpm.fetch_page_mut(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::from_bytes(&guard.data()[..]);
        if !header.update_record(&self.index_name, root) {
            assert!(
                header.insert_record(&self.index_name, root),
                "header page full"
            );
        }
        guard.data_mut().copy_from_slice(header.as_bytes());
        guard.mark_dirty();
        Ok(())
    }

    /// Forward iterator from the smallest key.
    pub fn iter(&self) -> Result<IndexIterator<'_>> {
        let root = *self.root_page_id.lock();
        if root == INVALID_PAGE_ID {
            return Ok(IndexIterator::empty(&self.bpm));
        }

        let mut page_id = root;
        loop {
            let guard = self.bpm.fetch_page(page_id)?;
            let data = guard.data();
            match node::page_type(&data[..])? {
                NodeType::Leaf => break,
                NodeType::Internal => {
                    page_id = InternalNode::from_bytes(&data[..]).child_at(0);
                }
            }
        }
        IndexIterator::positioned(&self.bpm, page_id, 0)
    }

    /// Forward iterator from the first key >= `key`.
    pub fn iter_from(&self, key: i64) -> Result<IndexIterator<'_>> {
        let root = *self.root_page_id.lock();
        if root == INVALID_PAGE_ID {
            return Ok(IndexIterator::empty(&self.bpm));
        }

        let leaf_id = self.find_leaf_page(root, key)?;
        let index = {
            let guard = self.bpm.fetch_page(leaf_id)?;
            let index = LeafNode::from_bytes(&guard.data()[..]).find_index(key);
            index
        };
        IndexIterator::positioned(&self.bpm, leaf_id, index)
    }
}
