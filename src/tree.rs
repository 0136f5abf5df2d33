//! The reference-counted radix tree.

use std::fmt;

use smallvec::{smallvec, SmallVec};
use tracing::{debug, trace};

use crate::arena::{NodeArena, NodeRef};
use crate::matching::{match_key, Match, MatchMode};
use crate::{Config, MalformedTreeError};

/// Depth-first work list: a node and the path length before its prefix.
type Stack = SmallVec<[(NodeRef, usize); 32]>;
type PathBuf = SmallVec<[u8; 64]>;

#[cold]
#[inline(never)]
fn refcount_overflow() -> ! {
    panic!("key refcount overflowed u32")
}

/// Memory and shape statistics for a [`RadixTree`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeStats {
    /// Distinct live keys
    pub keys: usize,
    /// Allocated node records, the root included
    pub nodes: usize,
    /// Arena bytes covered by records, live or released
    pub arena_bytes: usize,
    /// Bytes of released records awaiting reuse or compaction
    pub released_bytes: usize,
    /// Bytes reserved by the arena's buffers
    pub capacity_bytes: usize,
    /// Arena bytes per live key (0 for an empty tree)
    pub bytes_per_key: f64,
}

/// A radix tree of reference-counted byte-string keys.
///
/// Each key remembers how many times it was added; it stays present until
/// removed the same number of times. Keys sharing a prefix share the nodes
/// spelling it.
///
/// The tree performs no internal locking. Wrap it in the caller's own mutex
/// when several threads need it.
#[derive(Clone)]
pub struct RadixTree {
    nodes: NodeArena,
    /// Always present; its prefix is always empty.
    root: NodeRef,
    /// Distinct keys with a positive refcount.
    size: usize,
    config: Config,
}

impl RadixTree {
    /// Creates an empty tree with the default [`Config`].
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates an empty tree with the given configuration.
    pub fn with_config(config: Config) -> Self {
        let mut nodes = NodeArena::with_capacity(config.initial_capacity);
        let root = nodes.alloc(0, &[], 0);
        Self {
            nodes,
            root,
            size: 0,
            config,
        }
    }

    /// Number of distinct keys currently present.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Same as [`size`](Self::size).
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether no key is present.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The configuration this tree was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Slot maintenance
    // =========================================================================

    /// Writes `node` into the slot that references it: `holder`'s edge at
    /// `edge_index`, or the root slot when there is no holder.
    #[inline]
    fn relink(&mut self, holder: Option<NodeRef>, edge_index: usize, node: NodeRef) {
        match holder {
            Some(holder) => self.nodes.set_child_at(holder, edge_index, node),
            None => self.root = node,
        }
    }

    fn merge_with_only_child(&mut self, node: NodeRef) -> NodeRef {
        debug_assert_eq!(self.nodes.edgecount(node), 1);
        debug_assert_eq!(self.nodes.refcount(node), 0);
        let child = self.nodes.child_at(node, 0);
        trace!(
            head = self.nodes.prefix_len(node),
            tail = self.nodes.prefix_len(child),
            "merging node with its only child"
        );
        self.nodes.merge_child(node, child)
    }

    fn maybe_auto_compact(&mut self) {
        if self.config.auto_compact
            && self.nodes.released_bytes() >= self.config.compaction_threshold
        {
            let released = self.nodes.released_bytes();
            let rewritten = self.compact();
            debug!(released, rewritten, "auto-compacted node arena");
        }
    }

    // =========================================================================
    // Core operations
    // =========================================================================

    /// Adds one reference to `key`.
    ///
    /// Returns `true` if the key was absent before this call, `false` if it
    /// was already present and only its refcount grew.
    pub fn add(&mut self, key: impl AsRef<[u8]>) -> bool {
        let key = key.as_ref();
        let m = match_key(&self.nodes, self.root, key, MatchMode::Edit);
        let current = m.current;

        if m.consumed_prefix(&self.nodes) {
            if m.key_bytes_matched == key.len() {
                let refcount = self.nodes.refcount(current);
                let bumped = refcount.checked_add(1).unwrap_or_else(|| refcount_overflow());
                self.nodes.set_refcount(current, bumped);
                if refcount > 0 {
                    return false;
                }
            } else {
                // No edge for the next byte: hang a new leaf off `current`.
                let rest = &key[m.key_bytes_matched..];
                let leaf = self.nodes.alloc(1, rest, 0);
                let grown = self.nodes.push_edge(current, rest[0], leaf);
                self.relink(m.parent, m.edge_index, grown);
                trace!(depth = m.key_bytes_matched, suffix = rest.len(), "appended leaf");
            }
        } else {
            self.split(&m, key);
        }

        self.size += 1;
        self.maybe_auto_compact();
        true
    }

    /// Splits `m.current` where `key` diverged from its prefix. The node keeps
    /// the shared part; its remaining prefix, refcount and edges move to a new
    /// child, and any unconsumed key bytes become a second, new leaf.
    fn split(&mut self, m: &Match, key: &[u8]) {
        let at = m.prefix_bytes_matched;
        let key_ends_here = m.key_bytes_matched == key.len();

        let tail = self.nodes.split_off(m.current, at);
        let head = self
            .nodes
            .resize(m.current, at, if key_ends_here { 1 } else { 2 });
        self.relink(m.parent, m.edge_index, head);

        self.nodes.set_refcount(head, u32::from(key_ends_here));
        let tail_first = self.nodes.prefix(tail)[0];
        self.nodes.set_edge_at(head, 0, tail_first, tail);

        if !key_ends_here {
            let rest = &key[m.key_bytes_matched..];
            let leaf = self.nodes.alloc(1, rest, 0);
            self.nodes.set_edge_at(head, 1, rest[0], leaf);
        }

        trace!(at, key_ends_here, "split node");
    }

    /// Drops one reference to `key`.
    ///
    /// Returns `true` if a reference was released, whether or not it was the
    /// last one; `false` if the key was not present. The key stays present
    /// (and [`size`](Self::size) unchanged) until its last reference goes.
    pub fn remove(&mut self, key: impl AsRef<[u8]>) -> bool {
        let key = key.as_ref();
        let m = match_key(&self.nodes, self.root, key, MatchMode::Edit);
        let current = m.current;

        if !m.is_exact(&self.nodes, key.len()) {
            return false;
        }
        let refcount = self.nodes.refcount(current);
        if refcount == 0 {
            return false;
        }

        self.nodes.set_refcount(current, refcount - 1);
        if refcount > 1 {
            return true;
        }
        self.size -= 1;

        // Only the root has no parent, and it stays put whatever its shape.
        debug_assert_eq!(m.parent.is_none(), current == self.root);
        if let Some(parent) = m.parent {
            match self.nodes.edgecount(current) {
                0 => self.prune_leaf(parent, &m),
                1 => {
                    let merged = self.merge_with_only_child(current);
                    self.relink(m.parent, m.edge_index, merged);
                }
                _ => {}
            }
        }

        self.maybe_auto_compact();
        true
    }

    /// Unlinks the keyless leaf `m.current` from `parent` and releases it,
    /// then merges the parent into its remaining child if it no longer earns
    /// its place.
    fn prune_leaf(&mut self, parent: NodeRef, m: &Match) {
        debug_assert_eq!(m.parent, Some(parent));
        let shrunk = self.nodes.swap_remove_edge(parent, m.edge_index);
        self.relink(m.grandparent, m.parent_edge_index, shrunk);
        self.nodes.release(m.current);
        trace!(remaining_edges = self.nodes.edgecount(shrunk), "pruned leaf");

        // A `None` grandparent means the parent is the root.
        if m.grandparent.is_some()
            && self.nodes.refcount(shrunk) == 0
            && self.nodes.edgecount(shrunk) == 1
        {
            let merged = self.merge_with_only_child(shrunk);
            self.relink(m.grandparent, m.parent_edge_index, merged);
        }
    }

    /// Whether `key` is present.
    pub fn check(&self, key: impl AsRef<[u8]>) -> bool {
        self.refcount(key) > 0
    }

    /// Number of outstanding references to `key`; 0 when absent.
    pub fn refcount(&self, key: impl AsRef<[u8]>) -> u32 {
        let key = key.as_ref();
        let m = match_key(&self.nodes, self.root, key, MatchMode::Lookup);
        if m.is_exact(&self.nodes, key.len()) {
            self.nodes.refcount(m.current)
        } else {
            0
        }
    }

    /// Whether any present key is a prefix of `topic`.
    ///
    /// This is the publish-side test: a message on `topic` has a subscriber
    /// when one of the stored filters prefixes it. The empty key matches every
    /// topic.
    pub fn matches(&self, topic: impl AsRef<[u8]>) -> bool {
        let m = match_key(&self.nodes, self.root, topic.as_ref(), MatchMode::Subscription);
        m.consumed_prefix(&self.nodes) && self.nodes.refcount(m.current) > 0
    }

    /// Calls `f` once with every present key, in no particular order.
    ///
    /// Any caller context is captured by the closure. The tree cannot be
    /// modified while the walk is running.
    pub fn apply<F>(&self, mut f: F)
    where
        F: FnMut(&[u8]),
    {
        let mut path = PathBuf::new();
        let mut stack: Stack = smallvec![(self.root, 0)];

        while let Some((node, depth)) = stack.pop() {
            path.truncate(depth);
            path.extend_from_slice(self.nodes.prefix(node));
            if self.nodes.refcount(node) > 0 {
                f(&path);
            }
            let depth = path.len();
            stack.extend(self.nodes.edges(node).map(|(_, child)| (child, depth)));
        }
    }

    /// Iterator over every present key, in no particular order.
    pub fn iter(&self) -> Keys<'_> {
        Keys {
            tree: self,
            path: PathBuf::new(),
            stack: smallvec![(self.root, 0)],
        }
    }

    // =========================================================================
    // Housekeeping
    // =========================================================================

    /// Removes every key, keeping the configuration.
    pub fn clear(&mut self) {
        let mut nodes = NodeArena::with_capacity(self.config.initial_capacity);
        self.root = nodes.alloc(0, &[], 0);
        self.nodes = nodes;
        self.size = 0;
    }

    /// Bytes currently reserved by the tree's node storage.
    pub fn memory_usage(&self) -> usize {
        self.nodes.capacity()
    }

    /// Releases spare capacity held by the arena's buffers.
    pub fn shrink_to_fit(&mut self) {
        self.nodes.shrink_to_fit();
    }

    /// Rebuilds the node arena from the live nodes only, dropping the space
    /// held by released records. Returns the number of nodes rewritten.
    pub fn compact(&mut self) -> usize {
        let reclaimed = self.nodes.released_bytes();
        let (nodes, root) = self.nodes.compacted(self.root);
        let rewritten = nodes.live_nodes();
        self.nodes = nodes;
        self.root = root;
        debug!(rewritten, reclaimed, "compacted node arena");
        rewritten
    }

    /// Snapshot of the tree's shape and memory use.
    pub fn stats(&self) -> TreeStats {
        let arena_bytes = self.nodes.used_bytes();
        TreeStats {
            keys: self.size,
            nodes: self.nodes.live_nodes(),
            arena_bytes,
            released_bytes: self.nodes.released_bytes(),
            capacity_bytes: self.nodes.capacity(),
            bytes_per_key: if self.size > 0 {
                arena_bytes as f64 / self.size as f64
            } else {
                0.0
            },
        }
    }

    /// Checks every structural invariant of the tree.
    ///
    /// Intended for tests and debugging; the walk visits every node.
    pub fn validate(&self) -> Result<(), MalformedTreeError> {
        let root_prefix = self.nodes.prefix_len(self.root);
        if root_prefix != 0 {
            return Err(MalformedTreeError::RootHasPrefix { len: root_prefix });
        }

        let mut path = PathBuf::new();
        let mut stack: Stack = smallvec![(self.root, 0)];
        let mut reachable = 0usize;
        let mut found = 0usize;

        while let Some((node, depth)) = stack.pop() {
            reachable += 1;
            path.truncate(depth);
            path.extend_from_slice(self.nodes.prefix(node));

            let refcount = self.nodes.refcount(node);
            let edgecount = self.nodes.edgecount(node);
            if refcount > 0 {
                found += 1;
            } else if node != self.root && edgecount == 0 {
                return Err(MalformedTreeError::PrunableNode {
                    key_prefix: path.to_vec(),
                });
            } else if node != self.root && edgecount == 1 {
                return Err(MalformedTreeError::MergeableNode {
                    key_prefix: path.to_vec(),
                });
            }

            let mut seen = [false; 256];
            for (first_byte, child) in self.nodes.edges(node) {
                if std::mem::replace(&mut seen[first_byte as usize], true) {
                    return Err(MalformedTreeError::DuplicateEdge {
                        key_prefix: path.to_vec(),
                        first_byte,
                    });
                }
                match self.nodes.prefix(child).first() {
                    None => {
                        return Err(MalformedTreeError::EmptyPrefix {
                            key_prefix: path.to_vec(),
                        })
                    }
                    Some(&actual) if actual != first_byte => {
                        return Err(MalformedTreeError::FirstByteMismatch {
                            key_prefix: path.to_vec(),
                            first_byte,
                            actual,
                        })
                    }
                    Some(_) => stack.push((child, path.len())),
                }
            }
        }

        if found != self.size {
            return Err(MalformedTreeError::SizeMismatch {
                reported: self.size,
                found,
            });
        }
        if reachable != self.nodes.live_nodes() {
            return Err(MalformedTreeError::UnreachableNodes {
                allocated: self.nodes.live_nodes(),
                reachable,
            });
        }
        Ok(())
    }
}

impl Default for RadixTree {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: AsRef<[u8]>> Extend<K> for RadixTree {
    fn extend<I: IntoIterator<Item = K>>(&mut self, iter: I) {
        for key in iter {
            self.add(key);
        }
    }
}

impl<K: AsRef<[u8]>> FromIterator<K> for RadixTree {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        let mut tree = Self::new();
        tree.extend(iter);
        tree
    }
}

struct KeyDebug<'a>(&'a [u8]);

impl fmt::Debug for KeyDebug<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b\"{}\"", self.0.escape_ascii())
    }
}

impl fmt::Debug for RadixTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        self.apply(|key| {
            set.entry(&KeyDebug(key));
        });
        set.finish()
    }
}

impl<'a> IntoIterator for &'a RadixTree {
    type Item = Vec<u8>;
    type IntoIter = Keys<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the keys of a [`RadixTree`], created by [`RadixTree::iter`].
pub struct Keys<'a> {
    tree: &'a RadixTree,
    path: PathBuf,
    stack: Stack,
}

impl Iterator for Keys<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        let tree = self.tree;
        let nodes = &tree.nodes;
        while let Some((node, depth)) = self.stack.pop() {
            self.path.truncate(depth);
            self.path.extend_from_slice(nodes.prefix(node));
            let depth = self.path.len();
            self.stack
                .extend(nodes.edges(node).map(|(_, child)| (child, depth)));
            if nodes.refcount(node) > 0 {
                return Some(self.path.to_vec());
            }
        }
        None
    }
}
