use thiserror::Error;

/// A violated structural invariant, reported by [`RadixTree::validate`].
///
/// Key prefixes are the concatenated node prefixes from the root down to and
/// including the offending node.
///
/// [`RadixTree::validate`]: crate::RadixTree::validate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedTreeError {
    /// The root carries prefix bytes; it must always be empty.
    #[error("root node has a {len}-byte prefix, expected an empty one")]
    RootHasPrefix {
        /// Length of the root's prefix
        len: usize,
    },
    /// A non-root node has an empty prefix.
    #[error("node under {key_prefix:?} has an empty prefix")]
    EmptyPrefix {
        /// Key prefix of the parent node
        key_prefix: Vec<u8>,
    },
    /// An edge's first byte does not match the first byte of its child.
    #[error(
        "edge {first_byte:#04x} under {key_prefix:?} leads to a node starting with {actual:#04x}"
    )]
    FirstByteMismatch {
        /// Key prefix of the parent node
        key_prefix: Vec<u8>,
        /// Byte recorded on the edge
        first_byte: u8,
        /// First byte of the child's prefix
        actual: u8,
    },
    /// Two edges of one node share a first byte.
    #[error("node at {key_prefix:?} has more than one edge labelled {first_byte:#04x}")]
    DuplicateEdge {
        /// Key prefix of the node
        key_prefix: Vec<u8>,
        /// The repeated byte
        first_byte: u8,
    },
    /// A non-root node holds no key and has no children; it should have been
    /// pruned.
    #[error("node at {key_prefix:?} holds no key and has no children")]
    PrunableNode {
        /// Key prefix of the node
        key_prefix: Vec<u8>,
    },
    /// A non-root node holds no key and has a single child; it should have
    /// been merged with it.
    #[error("node at {key_prefix:?} holds no key and has a single child")]
    MergeableNode {
        /// Key prefix of the node
        key_prefix: Vec<u8>,
    },
    /// The live key counter disagrees with the keys reachable in the tree.
    #[error("tree reports {reported} keys but {found} are reachable")]
    SizeMismatch {
        /// Value of the counter
        reported: usize,
        /// Nodes with a positive refcount
        found: usize,
    },
    /// The arena holds records that are not reachable from the root.
    #[error("arena holds {allocated} node records but only {reachable} are reachable")]
    UnreachableNodes {
        /// Records allocated and not released
        allocated: usize,
        /// Records reachable from the root
        reachable: usize,
    },
}
