use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::buffer::PageRef;
use crate::common::{PageId, Result, INVALID_PAGE_ID};
use crate::storage::Pager;

use super::cursor::Cursor;
use super::node::{Node, NODE_CAP};

/// Order-preserving B+ tree over fixed-width (u32 key, u32 value) pairs,
/// built on pages obtained from the pager.
///
/// The root is always a branch. Keys within a node are sorted; branch
/// entry keys are the maxima of their subtrees, with the rightmost child
/// behind the node's `next` pointer. Leaves form a doubly linked chain in
/// ascending key order. Duplicate keys are allowed and keep arrival
/// order. Deletion is not implemented.
///
/// Writers take the tree's root lock exclusively for the whole insert;
/// readers (cursors) share it for their lifetime. Every node view on the
/// call stack pins its page, so a split cannot lose pages to eviction
/// midway.
pub struct BTree {
    pager: Arc<Pager>,
    root: RwLock<PageRef>,
    leaf_cap: usize,
    branch_cap: usize,
}

impl BTree {
    /// Creates a fresh tree: a branch root over two empty leaves, with
    /// the root's single entry (key 0) pointing at the left leaf and its
    /// rightmost pointer at the right leaf.
    pub fn new(pager: Arc<Pager>) -> Result<Self> {
        Self::with_caps(pager, NODE_CAP, NODE_CAP)
    }

    /// `new` with reduced node capacities, for exercising splits on small
    /// trees.
    pub fn with_caps(pager: Arc<Pager>, leaf_cap: usize, branch_cap: usize) -> Result<Self> {
        assert!(
            (2..=NODE_CAP).contains(&leaf_cap) && (4..=NODE_CAP).contains(&branch_cap),
            "unusable node capacities"
        );

        let root_id = pager.allocate_page()?;
        let left_id = pager.allocate_page()?;
        let right_id = pager.allocate_page()?;

        let root_page = pager.fetch_page(root_id)?;
        let left_page = pager.fetch_page(left_id)?;
        let right_page = pager.fetch_page(right_id)?;

        let mut root = Node::init_branch(root_page.clone());
        let left = Node::init_leaf(left_page, INVALID_PAGE_ID, right_id);
        let right = Node::init_leaf(right_page, left_id, INVALID_PAGE_ID);

        root.insert_branch(0, left_id);
        root.next = right_id;
        root.write_header();
        left.write_header();
        right.write_header();

        Ok(Self {
            pager,
            root: RwLock::new(root_page),
            leaf_cap,
            branch_cap,
        })
    }

    /// Opens an existing tree rooted at `root_id`.
    pub fn open(root_id: PageId, pager: Arc<Pager>) -> Result<Self> {
        let root_page = pager.fetch_page(root_id)?;
        Ok(Self {
            pager,
            root: RwLock::new(root_page),
            leaf_cap: NODE_CAP,
            branch_cap: NODE_CAP,
        })
    }

    /// Current root page id. Changes when a full root is split; callers
    /// persisting the tree must re-read it after inserts.
    pub fn root_id(&self) -> PageId {
        self.root.read().id()
    }

    /// Inserts a (key, value) pair. Duplicates of an existing key land
    /// after it.
    pub fn insert(&self, key: u32, value: u32) -> Result<()> {
        let mut root_slot = self.root.write();

        // Record the top-down path of node views; each view pins its page.
        let mut path = vec![Node::read(root_slot.clone())];
        loop {
            let node = path.last().unwrap();
            if node.is_leaf {
                break;
            }
            let (_, child) = node.search_branch(key);
            if !child.is_valid() {
                panic!("no valid branch pointer descending for key {key}");
            }
            let page = self.pager.fetch_page(child)?;
            path.push(Node::read(page));
        }

        let mut leaf = path.pop().unwrap();
        if leaf.len() < self.leaf_cap {
            leaf.insert_leaf(key, value);
            leaf.write_header();
            return Ok(());
        }

        self.insert_leaf_overflow(&mut root_slot, &mut path, leaf, key, value)
    }

    /// Positions a cursor at the first entry whose key is >= `key`
    /// (possibly one past the end of its leaf). The cursor keeps the root
    /// read-locked until closed.
    pub fn search(&self, key: u32) -> Cursor<'_> {
        let root_slot = self.root.read();

        let mut node = Node::read(root_slot.clone());
        loop {
            if node.is_leaf {
                let idx = node.search_leaf(key);
                return Cursor::positioned(&self.pager, root_slot, node, idx);
            }

            let (_, child) = node.search_branch(key);
            if !child.is_valid() {
                panic!("no valid branch pointer descending for key {key}");
            }
            match self.pager.fetch_page(child) {
                Ok(page) => node = Node::read(page),
                Err(err) => return Cursor::failed(&self.pager, root_slot, err),
            }
        }
    }

    /// Splits the full leaf `node`, inserts (key, value) into the correct
    /// half, and reattaches both halves under the parent, splitting full
    /// ancestors first when needed.
    fn insert_leaf_overflow(
        &self,
        root_slot: &mut PageRef,
        path: &mut Vec<Node>,
        mut node: Node,
        key: u32,
        value: u32,
    ) -> Result<()> {
        let mut parent = path.pop().expect("leaf has no parent branch");

        // Make room in the parent for one more entry before touching the
        // leaf; the split may cascade all the way to the root.
        if parent.len() == self.branch_cap {
            let (parent_mid, parent_rhs) = self.split_branch(root_slot, path, &mut parent, key)?;
            if key > parent_mid {
                parent = parent_rhs;
            }
        }

        let (mid, mut new_leaf) = self.split_node(&mut node)?;
        debug!(leaf = %node.id(), new_leaf = %new_leaf.id(), mid, "leaf split");
        if key < mid {
            node.insert_leaf(key, value);
        } else {
            new_leaf.insert_leaf(key, value);
        }

        // Detach the parent's reference to the old leaf.
        let (idx, _) = parent.search_branch(key);
        let is_rightmost = idx == parent.len();
        if !is_rightmost {
            parent.remove_branch(idx);
        }

        // Stitch the new leaf into the sibling chain.
        new_leaf.prev = node.id();
        new_leaf.next = node.next;
        node.next = new_leaf.id();
        if new_leaf.next.is_valid() {
            let neighbor_page = self.pager.fetch_page(new_leaf.next)?;
            let mut neighbor = Node::read(neighbor_page);
            neighbor.prev = new_leaf.id();
            neighbor.write_header();
        }

        // Reattach both halves under the parent.
        parent.insert_branch(mid, node.id());
        if is_rightmost {
            parent.next = new_leaf.id();
        } else {
            parent.insert_branch(new_leaf.last_leaf_key(), new_leaf.id());
        }

        parent.write_header();
        node.write_header();
        new_leaf.write_header();
        Ok(())
    }

    /// Splits the full branch `node` whose ancestors are on `path`,
    /// promoting its separator into the parent (or a brand-new root).
    /// Returns the separator and the new right sibling; `node` remains
    /// valid as the left half.
    fn split_branch(
        &self,
        root_slot: &mut PageRef,
        path: &mut Vec<Node>,
        node: &mut Node,
        key: u32,
    ) -> Result<(u32, Node)> {
        if path.is_empty() {
            // `node` is the root: promote a new branch above it.
            let new_root_id = self.pager.allocate_page()?;
            let new_root_page = self.pager.fetch_page(new_root_id)?;

            let (mid, right) = self.split_node(node)?;
            let mut new_root = Node::init_branch(new_root_page.clone());
            new_root.next = right.id();
            new_root.insert_branch(mid, node.id());

            new_root.write_header();
            node.write_header();
            right.write_header();

            debug!(old_root = %node.id(), new_root = %new_root_id, "root split");
            *root_slot = new_root_page;
            return Ok((mid, right));
        }

        let mut parent = path.pop().unwrap();
        if parent.len() == self.branch_cap {
            let (parent_mid, parent_rhs) = self.split_branch(root_slot, path, &mut parent, key)?;
            if key > parent_mid {
                parent = parent_rhs;
            }
        }

        let (mid, right) = self.split_node(node)?;
        debug!(branch = %node.id(), new_branch = %right.id(), mid, "branch split");

        let (idx, _) = parent.search_branch(key);
        let is_rightmost = idx == parent.len();
        if !is_rightmost {
            parent.remove_branch(idx);
        }

        parent.insert_branch(mid, node.id());
        if is_rightmost {
            parent.next = right.id();
        } else {
            let max_key = self.max_key_under(&right)?;
            parent.insert_branch(max_key, right.id());
        }

        parent.write_header();
        node.write_header();
        right.write_header();
        Ok((mid, right))
    }

    /// Moves the upper half of `node` onto a freshly allocated sibling.
    ///
    /// For a leaf the separator is the last key left behind. For a branch
    /// the entry at the midpoint is consumed: its key is the separator
    /// and its child becomes the left half's rightmost pointer, while
    /// entries above it move right. Headers are the caller's to rewrite.
    fn split_node(&self, node: &mut Node) -> Result<(u32, Node)> {
        let new_id = self.pager.allocate_page()?;
        let new_page = self.pager.fetch_page(new_id)?;
        let len = node.len();

        if node.is_leaf {
            let mut right = Node::init_leaf(new_page, INVALID_PAGE_ID, INVALID_PAGE_ID);
            let (mid, _) = node.leaf_entry(len / 2 - 1);
            node.move_tail_to(len / 2, &mut right);
            Ok((mid, right))
        } else {
            let mut right = Node::init_branch(new_page);
            let (mid, sep_child) = node.branch_entry(len / 2);
            node.move_tail_to(len / 2 + 1, &mut right);
            right.next = node.next;
            node.next = sep_child;
            node.slots = (len / 2) as u16;
            Ok((mid, right))
        }
    }

    /// Largest key stored under `node`, found by chasing rightmost
    /// pointers down to a leaf.
    fn max_key_under(&self, node: &Node) -> Result<u32> {
        let mut next = node.next;
        loop {
            let page = self.pager.fetch_page(next)?;
            let cur = Node::read(page);
            if cur.is_leaf {
                return Ok(cur.last_leaf_key());
            }
            next = cur.next;
        }
    }
}
