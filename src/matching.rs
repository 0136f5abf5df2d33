//! Prefix-matching descent shared by every tree operation.
//!
//! The walk starts at the root and alternates between comparing the node's
//! prefix against the unconsumed key and picking the child whose first byte
//! equals the next key byte. It stops at the first divergence, at a missing
//! edge, or when the key runs out.

use crate::arena::{NodeArena, NodeRef};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MatchMode {
    /// Read-only membership query.
    Lookup,
    /// Structural query for insertion and removal; tracks the parent and
    /// grandparent window.
    Edit,
    /// Read-only; stops at the first node holding a key whose prefix was fully
    /// consumed, i.e. the first stored key that prefixes the query.
    Subscription,
}

/// Where a descent stopped.
///
/// The node references are only valid until the next arena mutation that
/// relocates them; callers rewrite slots in the order they edit.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Match {
    /// Key bytes consumed, including those matched inside `current`.
    pub(crate) key_bytes_matched: usize,
    /// Bytes of `current`'s prefix that matched.
    pub(crate) prefix_bytes_matched: usize,
    /// Index of the edge from `parent` to `current`.
    pub(crate) edge_index: usize,
    /// Index of the edge from `grandparent` to `parent`.
    pub(crate) parent_edge_index: usize,
    pub(crate) current: NodeRef,
    /// `None` when `current` is the root. Only tracked in [`MatchMode::Edit`].
    pub(crate) parent: Option<NodeRef>,
    /// `None` when `parent` is the root or absent.
    pub(crate) grandparent: Option<NodeRef>,
}

impl Match {
    /// The key ended exactly at the end of `current`'s prefix.
    #[inline]
    pub(crate) fn is_exact(&self, nodes: &NodeArena, key_len: usize) -> bool {
        self.key_bytes_matched == key_len && self.consumed_prefix(nodes)
    }

    /// `current`'s whole prefix matched.
    #[inline]
    pub(crate) fn consumed_prefix(&self, nodes: &NodeArena) -> bool {
        self.prefix_bytes_matched == nodes.prefix_len(self.current)
    }
}

#[inline]
fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

pub(crate) fn match_key(nodes: &NodeArena, root: NodeRef, key: &[u8], mode: MatchMode) -> Match {
    let mut current = root;
    let mut parent = None;
    let mut grandparent = None;
    let mut key_bytes_matched = 0usize;
    let mut prefix_bytes_matched;
    let mut edge_index = 0usize;
    let mut parent_edge_index = 0usize;

    loop {
        let prefix = nodes.prefix(current);
        prefix_bytes_matched = common_prefix_len(prefix, &key[key_bytes_matched..]);
        key_bytes_matched += prefix_bytes_matched;

        // Diverged inside the prefix, or the key ended inside it.
        if prefix_bytes_matched != prefix.len() {
            break;
        }

        if mode == MatchMode::Subscription && nodes.refcount(current) > 0 {
            break;
        }

        if key_bytes_matched == key.len() {
            break;
        }

        let Some(index) = nodes.find_edge(current, key[key_bytes_matched]) else {
            break;
        };

        if mode == MatchMode::Edit {
            parent_edge_index = edge_index;
            grandparent = parent;
            parent = Some(current);
        }
        edge_index = index;
        current = nodes.child_at(current, index);
    }

    Match {
        key_bytes_matched,
        prefix_bytes_matched,
        edge_index,
        parent_edge_index,
        current,
        parent,
        grandparent,
    }
}
