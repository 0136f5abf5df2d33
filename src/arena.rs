//! Packed node records.
//!
//! Every trie node lives in one byte arena as a variable-length record:
//!
//! ```text
//! [refcount:4][prefix_len:4][edgecount:4][prefix: prefix_len][first bytes: edgecount][children: 4 * edgecount]
//! ```
//!
//! Integers are little endian and children are 32-bit arena offsets. A record
//! never changes size in place: [`NodeArena::resize`] copies the node into a
//! record of the new shape and releases the old one, so the returned
//! [`NodeRef`] must be written back into whichever slot (a parent's edge or the
//! tree's root) held the old reference before anything else reads it.

use std::collections::HashMap;

pub(crate) const HEADER_SIZE: usize = 12;
pub(crate) const REF_SIZE: usize = 4;

/// Offsets are 32 bits wide.
const MAX_ARENA_BYTES: usize = u32::MAX as usize;

/// Offset of a node record inside a [`NodeArena`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub(crate) struct NodeRef(u32);

impl NodeRef {
    #[inline]
    fn offset(self) -> usize {
        self.0 as usize
    }
}

#[inline]
pub(crate) fn record_size(prefix_len: usize, edgecount: usize) -> usize {
    HEADER_SIZE + prefix_len + edgecount * (1 + REF_SIZE)
}

#[cold]
#[inline(never)]
fn arena_overflow() -> ! {
    panic!("node arena exceeded {MAX_ARENA_BYTES} bytes")
}

/// Byte arena holding every node record of one tree.
#[derive(Clone)]
pub(crate) struct NodeArena {
    data: Vec<u8>,
    /// Free lists keyed by exact record size. Record sizes grow with key
    /// length, so every size gets a list.
    free: HashMap<usize, Vec<u32>>,
    /// Bytes held by released records, recycled later or reclaimed by compaction.
    released: usize,
    live: usize,
}

impl NodeArena {
    pub(crate) fn with_capacity(bytes: usize) -> Self {
        Self {
            data: Vec::with_capacity(bytes),
            free: HashMap::new(),
            released: 0,
            live: 0,
        }
    }

    /// Number of records allocated and not yet released.
    #[inline]
    pub(crate) fn live_nodes(&self) -> usize {
        self.live
    }

    #[inline]
    pub(crate) fn used_bytes(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub(crate) fn released_bytes(&self) -> usize {
        self.released
    }

    pub(crate) fn capacity(&self) -> usize {
        self.data.capacity()
            + self.free.values().map(|v| v.capacity() * REF_SIZE).sum::<usize>()
    }

    pub(crate) fn shrink_to_fit(&mut self) {
        self.data.shrink_to_fit();
        self.free.retain(|_, v| !v.is_empty());
        for v in self.free.values_mut() {
            v.shrink_to_fit();
        }
        self.free.shrink_to_fit();
    }

    // =========================================================================
    // Raw access
    // =========================================================================

    #[inline]
    fn read_u32(&self, at: usize) -> u32 {
        u32::from_le_bytes([
            self.data[at],
            self.data[at + 1],
            self.data[at + 2],
            self.data[at + 3],
        ])
    }

    #[inline]
    fn write_u32(&mut self, at: usize, v: u32) {
        self.data[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    #[inline]
    fn prefix_start(&self, node: NodeRef) -> usize {
        node.offset() + HEADER_SIZE
    }

    #[inline]
    fn first_bytes_start(&self, node: NodeRef) -> usize {
        self.prefix_start(node) + self.prefix_len(node)
    }

    #[inline]
    fn children_start(&self, node: NodeRef) -> usize {
        self.first_bytes_start(node) + self.edgecount(node)
    }

    // =========================================================================
    // Header and body
    // =========================================================================

    #[inline]
    pub(crate) fn refcount(&self, node: NodeRef) -> u32 {
        self.read_u32(node.offset())
    }

    #[inline]
    pub(crate) fn set_refcount(&mut self, node: NodeRef, refcount: u32) {
        self.write_u32(node.offset(), refcount);
    }

    #[inline]
    pub(crate) fn prefix_len(&self, node: NodeRef) -> usize {
        self.read_u32(node.offset() + 4) as usize
    }

    #[inline]
    pub(crate) fn edgecount(&self, node: NodeRef) -> usize {
        self.read_u32(node.offset() + 8) as usize
    }

    #[inline]
    pub(crate) fn record_len(&self, node: NodeRef) -> usize {
        record_size(self.prefix_len(node), self.edgecount(node))
    }

    #[inline]
    pub(crate) fn prefix(&self, node: NodeRef) -> &[u8] {
        let start = self.prefix_start(node);
        &self.data[start..start + self.prefix_len(node)]
    }

    #[inline]
    pub(crate) fn first_bytes(&self, node: NodeRef) -> &[u8] {
        let start = self.first_bytes_start(node);
        &self.data[start..start + self.edgecount(node)]
    }

    #[inline]
    pub(crate) fn first_byte_at(&self, node: NodeRef, index: usize) -> u8 {
        debug_assert!(index < self.edgecount(node));
        self.data[self.first_bytes_start(node) + index]
    }

    #[inline]
    pub(crate) fn child_at(&self, node: NodeRef, index: usize) -> NodeRef {
        debug_assert!(index < self.edgecount(node));
        NodeRef(self.read_u32(self.children_start(node) + index * REF_SIZE))
    }

    #[inline]
    pub(crate) fn set_child_at(&mut self, node: NodeRef, index: usize, child: NodeRef) {
        debug_assert!(index < self.edgecount(node));
        let at = self.children_start(node) + index * REF_SIZE;
        self.write_u32(at, child.0);
    }

    #[inline]
    pub(crate) fn set_edge_at(&mut self, node: NodeRef, index: usize, first_byte: u8, child: NodeRef) {
        debug_assert!(index < self.edgecount(node));
        let at = self.first_bytes_start(node) + index;
        self.data[at] = first_byte;
        self.set_child_at(node, index, child);
    }

    /// Index of the edge whose child starts with `byte`.
    #[inline]
    pub(crate) fn find_edge(&self, node: NodeRef, byte: u8) -> Option<usize> {
        self.first_bytes(node).iter().position(|&b| b == byte)
    }

    pub(crate) fn edges(&self, node: NodeRef) -> impl Iterator<Item = (u8, NodeRef)> + '_ {
        self.first_bytes(node)
            .iter()
            .enumerate()
            .map(move |(i, &b)| (b, self.child_at(node, i)))
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocates a record with a zeroed body and refcount.
    fn alloc_record(&mut self, prefix_len: usize, edgecount: usize) -> NodeRef {
        let size = record_size(prefix_len, edgecount);

        let off = match self.free.get_mut(&size).and_then(Vec::pop) {
            Some(off) => {
                let off = off as usize;
                self.released -= size;
                self.data[off..off + size].fill(0);
                off
            }
            None => {
                let off = self.data.len();
                if off + size > MAX_ARENA_BYTES {
                    arena_overflow();
                }
                self.data.resize(off + size, 0);
                off
            }
        };

        // Both fit: the record ends below MAX_ARENA_BYTES.
        self.write_u32(off + 4, prefix_len as u32);
        self.write_u32(off + 8, edgecount as u32);
        self.live += 1;
        NodeRef(off as u32)
    }

    /// Allocates a node holding `prefix`. Its `edgecount` edges must be set
    /// before the node becomes reachable.
    pub(crate) fn alloc(&mut self, refcount: u32, prefix: &[u8], edgecount: usize) -> NodeRef {
        let node = self.alloc_record(prefix.len(), edgecount);
        self.set_refcount(node, refcount);
        let start = self.prefix_start(node);
        self.data[start..start + prefix.len()].copy_from_slice(prefix);
        node
    }

    /// Returns the record to the arena. `node` must be unreachable.
    pub(crate) fn release(&mut self, node: NodeRef) {
        let size = self.record_len(node);
        self.free.entry(size).or_default().push(node.0);
        self.released += size;
        self.live -= 1;
    }

    /// Moves `node` into a record shaped for `prefix_len` prefix bytes and
    /// `edgecount` edges. The refcount, the leading prefix bytes and the
    /// leading edges that fit are carried over; the old record is released.
    pub(crate) fn resize(&mut self, node: NodeRef, prefix_len: usize, edgecount: usize) -> NodeRef {
        let old_prefix_len = self.prefix_len(node);
        let old_edgecount = self.edgecount(node);
        if old_prefix_len == prefix_len && old_edgecount == edgecount {
            return node;
        }

        let resized = self.alloc_record(prefix_len, edgecount);
        self.set_refcount(resized, self.refcount(node));

        let src = self.prefix_start(node);
        let keep = old_prefix_len.min(prefix_len);
        let dst = self.prefix_start(resized);
        self.data.copy_within(src..src + keep, dst);

        let keep = old_edgecount.min(edgecount);
        let src = self.first_bytes_start(node);
        let dst = self.first_bytes_start(resized);
        self.data.copy_within(src..src + keep, dst);
        let src = self.children_start(node);
        let dst = self.children_start(resized);
        self.data.copy_within(src..src + keep * REF_SIZE, dst);

        self.release(node);
        resized
    }

    /// Appends an edge, relocating `node`.
    pub(crate) fn push_edge(&mut self, node: NodeRef, first_byte: u8, child: NodeRef) -> NodeRef {
        let edgecount = self.edgecount(node);
        let grown = self.resize(node, self.prefix_len(node), edgecount + 1);
        self.set_edge_at(grown, edgecount, first_byte, child);
        grown
    }

    /// Drops the edge at `index` by moving the last edge into its slot,
    /// relocating `node`. The detached child is left untouched.
    pub(crate) fn swap_remove_edge(&mut self, node: NodeRef, index: usize) -> NodeRef {
        let last = self.edgecount(node) - 1;
        if index != last {
            let first_byte = self.first_byte_at(node, last);
            let child = self.child_at(node, last);
            self.set_edge_at(node, index, first_byte, child);
        }
        self.resize(node, self.prefix_len(node), last)
    }

    /// Allocates a node holding `node`'s prefix from `at` onwards along with
    /// its refcount and edges. `node` itself is not modified.
    pub(crate) fn split_off(&mut self, node: NodeRef, at: usize) -> NodeRef {
        let prefix_len = self.prefix_len(node);
        let edgecount = self.edgecount(node);
        debug_assert!(at < prefix_len);

        let tail = self.alloc_record(prefix_len - at, edgecount);
        self.set_refcount(tail, self.refcount(node));

        // Prefix tail, first bytes and children are contiguous in both records.
        let src = self.prefix_start(node) + at;
        let len = record_size(prefix_len - at, edgecount) - HEADER_SIZE;
        let dst = self.prefix_start(tail);
        self.data.copy_within(src..src + len, dst);
        tail
    }

    /// Folds `child` into `node`: the prefixes are concatenated and `node`
    /// takes over the child's refcount and edges. Both old records are
    /// released; the merged node is returned.
    pub(crate) fn merge_child(&mut self, node: NodeRef, child: NodeRef) -> NodeRef {
        let head = self.prefix_len(node);
        let tail = self.prefix_len(child);
        let edgecount = self.edgecount(child);

        let merged = self.resize(node, head + tail, edgecount);
        self.set_refcount(merged, self.refcount(child));

        let src = self.prefix_start(child);
        let len = record_size(tail, edgecount) - HEADER_SIZE;
        let dst = self.prefix_start(merged) + head;
        self.data.copy_within(src..src + len, dst);

        self.release(child);
        merged
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    fn copy_record_from(&mut self, other: &NodeArena, node: NodeRef) -> NodeRef {
        let copy = self.alloc_record(other.prefix_len(node), other.edgecount(node));
        let len = other.record_len(node);
        let (src, dst) = (node.offset(), copy.offset());
        self.data[dst..dst + len].copy_from_slice(&other.data[src..src + len]);
        copy
    }

    /// Copies every record reachable from `root` into a fresh, hole-free
    /// arena. Returns the new arena and the new root.
    pub(crate) fn compacted(&self, root: NodeRef) -> (NodeArena, NodeRef) {
        let mut fresh = NodeArena::with_capacity(self.used_bytes() - self.released);
        let new_root = fresh.copy_record_from(self, root);

        let mut stack: smallvec::SmallVec<[(NodeRef, NodeRef); 32]> = smallvec::smallvec![(root, new_root)];
        while let Some((old, new)) = stack.pop() {
            for i in 0..self.edgecount(old) {
                let child = self.child_at(old, i);
                let copy = fresh.copy_record_from(self, child);
                fresh.set_child_at(new, i, copy);
                stack.push((child, copy));
            }
        }

        (fresh, new_root)
    }
}
