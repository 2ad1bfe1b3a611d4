// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! The document tree
//!
//! An ordered list of nodes with implicit hierarchy: a heading owns the
//! nodes after it whose level is strictly greater, until a heading of equal
//! or lower level closes the region. Nodes live in an arena; `prev`/`next`
//! indices form the doubly-linked order and a `key -> slot` map gives
//! stable external identity. Slots are never reused within a run, so an
//! index taken before a merge stays valid unless its node was replaced.

pub mod node;

pub use node::{is_valid_id, slugify, KeyGen, Node, NodeKind, Role};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Result, TangleError};

/// Index of a node slot within its tree's arena.
pub type NodeIdx = usize;

/// How a fragment joins the tree at a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    #[default]
    Append,
    Prepend,
    Replace,
}

impl std::str::FromStr for MergeMode {
    type Err = TangleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "append" => Ok(MergeMode::Append),
            "prepend" => Ok(MergeMode::Prepend),
            "replace" => Ok(MergeMode::Replace),
            other => Err(TangleError::parse(format!(
                "invalid merge mode '{}': expected append, prepend or replace",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    node: Option<Node>,
    prev: Option<NodeIdx>,
    next: Option<NodeIdx>,
}

/// The in-memory, hierarchically interpreted linked list of nodes.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    slots: Vec<Slot>,
    head: Option<NodeIdx>,
    tail: Option<NodeIdx>,
    by_key: HashMap<String, NodeIdx>,
    len: usize,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from an ordered node list, issuing keys where missing.
    pub fn from_nodes(nodes: Vec<Node>, keygen: &KeyGen) -> Self {
        let mut tree = Self::new();
        for node in nodes {
            tree.push_back(node, keygen);
        }
        tree
    }

    pub fn head(&self) -> Option<NodeIdx> {
        self.head
    }

    pub fn tail(&self) -> Option<NodeIdx> {
        self.tail
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrow a node. Panics on a stale index, which indicates a bug in
    /// the caller: indices must come from this tree and survive merges
    /// only if the node was not replaced.
    pub fn node(&self, idx: NodeIdx) -> &Node {
        match self.slots[idx].node.as_ref() {
            Some(node) => node,
            None => panic!("stale node index {}", idx),
        }
    }

    pub fn node_mut(&mut self, idx: NodeIdx) -> &mut Node {
        match self.slots[idx].node.as_mut() {
            Some(node) => node,
            None => panic!("stale node index {}", idx),
        }
    }

    /// Borrow a node, returning `None` for a removed slot.
    pub fn get(&self, idx: NodeIdx) -> Option<&Node> {
        self.slots.get(idx).and_then(|s| s.node.as_ref())
    }

    pub fn next(&self, idx: NodeIdx) -> Option<NodeIdx> {
        self.slots[idx].next
    }

    pub fn prev(&self, idx: NodeIdx) -> Option<NodeIdx> {
        self.slots[idx].prev
    }

    /// Iterate node indices in document order.
    pub fn iter(&self) -> TreeIter<'_> {
        TreeIter {
            tree: self,
            cursor: self.head,
        }
    }

    /// Look up a node by key.
    pub fn by_key(&self, key: &str) -> Option<NodeIdx> {
        self.by_key.get(key).copied()
    }

    /// Linear search matching either id or key; id matches win.
    pub fn find_by_id_or_key(&self, query: &str) -> Option<NodeIdx> {
        self.iter()
            .find(|&idx| self.node(idx).id.as_deref() == Some(query))
            .or_else(|| self.by_key(query))
    }

    /// Successors whose level is strictly greater than the node's,
    /// stopping at the first with level <= (operation nodes included).
    pub fn children_under(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        let base = self.node(idx).level;
        let mut children = Vec::new();
        let mut cursor = self.next(idx);
        while let Some(i) = cursor {
            if self.node(i).level <= base {
                break;
            }
            children.push(i);
            cursor = self.next(i);
        }
        children
    }

    /// The node and its entire descendant region, in order.
    pub fn region(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        let mut region = vec![idx];
        region.extend(self.children_under(idx));
        region
    }

    /// Last index of the region rooted at `idx` (the node itself when it
    /// has no descendants).
    pub fn region_end(&self, idx: NodeIdx) -> NodeIdx {
        *self.region(idx).last().unwrap_or(&idx)
    }

    /// Clone the given nodes into a detached fragment. Keys are cleared so
    /// a later splice issues fresh identities.
    pub fn clone_fragment(&self, indices: &[NodeIdx]) -> Vec<Node> {
        indices
            .iter()
            .map(|&idx| {
                let mut node = self.node(idx).clone();
                node.key.clear();
                node
            })
            .collect()
    }

    /// Append a node at the tail, issuing a key if it has none.
    pub fn push_back(&mut self, node: Node, keygen: &KeyGen) -> NodeIdx {
        let idx = self.alloc(node, keygen);
        match self.tail {
            Some(tail) => {
                self.slots[tail].next = Some(idx);
                self.slots[idx].prev = Some(tail);
            }
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        idx
    }

    /// Splice `fragment` relative to `pos` per the merge mode:
    /// append after `pos`'s region, prepend before `pos`, or replace the
    /// whole region rooted at `pos`. Returns the spliced indices.
    pub fn insert(
        &mut self,
        pos: NodeIdx,
        fragment: Vec<Node>,
        mode: MergeMode,
        keygen: &KeyGen,
    ) -> Result<Vec<NodeIdx>> {
        if self.get(pos).is_none() {
            return Err(TangleError::Internal(format!(
                "merge target index {} is stale",
                pos
            )));
        }

        let (before, after) = match mode {
            MergeMode::Append => {
                let end = self.region_end(pos);
                (Some(end), self.next(end))
            }
            MergeMode::Prepend => (self.prev(pos), Some(pos)),
            MergeMode::Replace => {
                let region = self.region(pos);
                let before = self.prev(region[0]);
                let after = self.next(*region.last().unwrap_or(&pos));
                for idx in region {
                    self.remove(idx);
                }
                (before, after)
            }
        };

        if fragment.is_empty() {
            // A replace with an empty fragment still has to close the gap
            self.link(before, after);
            return Ok(Vec::new());
        }

        let mut spliced = Vec::with_capacity(fragment.len());
        let mut prev = before;
        for node in fragment {
            let idx = self.alloc(node, keygen);
            self.slots[idx].prev = prev;
            if let Some(p) = prev {
                self.slots[p].next = Some(idx);
            } else {
                self.head = Some(idx);
            }
            prev = Some(idx);
            spliced.push(idx);
        }
        let last = *spliced.last().unwrap_or(&pos);
        self.slots[last].next = after;
        match after {
            Some(a) => self.slots[a].prev = Some(last),
            None => self.tail = Some(last),
        }
        Ok(spliced)
    }

    fn alloc(&mut self, mut node: Node, keygen: &KeyGen) -> NodeIdx {
        // A colliding key means the node was cloned without clearing it;
        // treat it as unkeyed rather than corrupt the identity map.
        if !node.is_keyed() || self.by_key.contains_key(&node.key) {
            node.key = keygen.next_key();
        }
        let idx = self.slots.len();
        self.by_key.insert(node.key.clone(), idx);
        self.slots.push(Slot {
            node: Some(node),
            prev: None,
            next: None,
        });
        self.len += 1;
        idx
    }

    fn remove(&mut self, idx: NodeIdx) {
        if let Some(node) = self.slots[idx].node.take() {
            self.by_key.remove(&node.key);
            self.len -= 1;
        }
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        self.link(prev, next);
        self.slots[idx].prev = None;
        self.slots[idx].next = None;
    }

    fn link(&mut self, before: Option<NodeIdx>, after: Option<NodeIdx>) {
        match before {
            Some(b) => self.slots[b].next = after,
            None => self.head = after,
        }
        match after {
            Some(a) => self.slots[a].prev = before,
            None => self.tail = before,
        }
    }

    /// Verify chain and key invariants; used by tests and after merges in
    /// debug builds.
    pub fn check_integrity(&self) -> Result<()> {
        let mut seen_keys = std::collections::HashSet::new();
        let mut count = 0usize;
        let mut prev: Option<NodeIdx> = None;
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            if count > self.len {
                return Err(TangleError::Internal("cycle in node chain".to_string()));
            }
            let slot = &self.slots[idx];
            let node = slot.node.as_ref().ok_or_else(|| {
                TangleError::Internal(format!("chain references removed slot {}", idx))
            })?;
            if slot.prev != prev {
                return Err(TangleError::Internal(format!(
                    "prev link of slot {} is inconsistent",
                    idx
                )));
            }
            if !seen_keys.insert(node.key.clone()) {
                return Err(TangleError::Internal(format!(
                    "duplicate key {}",
                    node.key
                )));
            }
            count += 1;
            prev = Some(idx);
            cursor = slot.next;
        }
        if count != self.len {
            return Err(TangleError::Internal(format!(
                "chain length {} does not match tree length {}",
                count, self.len
            )));
        }
        if self.tail != prev {
            return Err(TangleError::Internal("tail link is inconsistent".to_string()));
        }
        Ok(())
    }
}

/// Iterator over node indices in document order.
pub struct TreeIter<'a> {
    tree: &'a Tree,
    cursor: Option<NodeIdx>,
}

impl<'a> Iterator for TreeIter<'a> {
    type Item = NodeIdx;

    fn next(&mut self) -> Option<NodeIdx> {
        let idx = self.cursor?;
        self.cursor = self.tree.slots[idx].next;
        Some(idx)
    }
}
