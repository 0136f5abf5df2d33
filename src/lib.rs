//! # topic-trie
//!
//! A reference-counted radix tree of byte-string keys, built for the
//! subscription side of a publish/subscribe router.
//!
//! Each stored key is a topic filter. Subscribing adds a reference,
//! unsubscribing drops one, and a filter disappears once its last reference
//! goes. On the publish side, [`RadixTree::matches`] reports whether any
//! stored filter is a prefix of a message's topic.
//!
//! ## Storage
//!
//! Nodes are variable-length records packed into a single byte arena and
//! linked by 32-bit offsets. Edits relocate records instead of resizing them
//! in place; released records are recycled by exact size, and the default
//! [`Config`] compacts the arena once enough released bytes pile up.
//!
//! ## Example
//!
//! ```rust
//! use topic_trie::RadixTree;
//!
//! let mut subs = RadixTree::new();
//! assert!(subs.add(b"weather.eu"));
//! assert!(!subs.add(b"weather.eu")); // second subscriber, same filter
//! subs.add(b"news");
//!
//! assert!(subs.check(b"weather.eu"));
//! assert!(subs.matches(b"weather.eu.paris"));
//! assert!(!subs.matches(b"weather.us"));
//! assert_eq!(subs.size(), 2);
//!
//! subs.remove(b"weather.eu");
//! assert!(subs.check(b"weather.eu"));
//! subs.remove(b"weather.eu");
//! assert!(!subs.check(b"weather.eu"));
//!
//! let mut keys = Vec::new();
//! subs.apply(|key| keys.push(key.to_vec()));
//! assert_eq!(keys, vec![b"news".to_vec()]);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod arena;
mod error;
mod matching;
mod tree;

pub use error::MalformedTreeError;
pub use tree::{Keys, RadixTree, TreeStats};

/// Configuration for a [`RadixTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Initial capacity hint for the node arena, in bytes
    pub initial_capacity: usize,
    /// Released bytes that trigger an automatic compaction
    pub compaction_threshold: usize,
    /// Compact the arena after an add or remove once `compaction_threshold`
    /// released bytes have accumulated. Released records are reused only by
    /// a new record of the same size, so turning this off lets churn over
    /// keys of varying length grow the arena until [`RadixTree::compact`]
    /// is called.
    pub auto_compact: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_capacity: 1024,
            compaction_threshold: 1 << 20,
            auto_compact: true,
        }
    }
}

#[cfg(test)]
mod proptests;
