use parking_lot::RwLockReadGuard;

use crate::buffer::PageRef;
use crate::common::StratumError;
use crate::storage::Pager;

use super::node::Node;

/// Forward-only iterator over the leaf chain, produced by
/// [`BTree::search`](super::BTree::search).
///
/// The cursor holds a shared lock on the tree root for its whole
/// lifetime, so no writer can restructure the tree underneath it; the
/// current leaf is pinned through its node view. `close` (or drop)
/// releases both.
pub struct Cursor<'t> {
    pager: &'t Pager,
    _root: RwLockReadGuard<'t, PageRef>,
    node: Option<Node>,
    idx: usize,
    err: Option<StratumError>,
}

impl<'t> Cursor<'t> {
    pub(crate) fn positioned(
        pager: &'t Pager,
        root: RwLockReadGuard<'t, PageRef>,
        node: Node,
        idx: usize,
    ) -> Self {
        Self {
            pager,
            _root: root,
            node: Some(node),
            idx,
            err: None,
        }
    }

    pub(crate) fn failed(
        pager: &'t Pager,
        root: RwLockReadGuard<'t, PageRef>,
        err: StratumError,
    ) -> Self {
        Self {
            pager,
            _root: root,
            node: None,
            idx: 0,
            err: Some(err),
        }
    }

    /// Advances to the next live entry, chasing `next` pointers across
    /// leaves (empty leaves are skipped). Returns false at the end of the
    /// chain or after an error.
    pub fn forward(&mut self) -> bool {
        if self.err.is_some() || self.node.is_none() {
            return false;
        }

        self.idx += 1;
        while self.idx >= self.node.as_ref().unwrap().len() {
            let next = self.node.as_ref().unwrap().next;
            if !next.is_valid() {
                return false;
            }
            match self.pager.fetch_page(next) {
                Ok(page) => {
                    self.node = Some(Node::read(page));
                    self.idx = 0;
                }
                Err(err) => {
                    self.err = Some(err);
                    return false;
                }
            }
        }
        true
    }

    /// The (key, value) pair under the cursor. Past the end of the
    /// current leaf this is the (0, 0) sentinel; it only carries meaning
    /// while the cursor is on a live entry.
    pub fn get(&self) -> (u32, u32) {
        match &self.node {
            Some(node) if self.idx < node.len() => node.leaf_entry(self.idx),
            _ => (0, 0),
        }
    }

    /// Terminal error, if a page fetch failed during search or forward.
    pub fn err(&self) -> Option<&StratumError> {
        self.err.as_ref()
    }

    /// Releases the root lock and the current leaf.
    pub fn close(self) {}
}
