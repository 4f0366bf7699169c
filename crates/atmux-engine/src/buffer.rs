//! Reference-counted packet-buffer pool.
//!
//! Received payload lives in pool nodes: variable-size storage with a
//! reference count, an optional explicit next-node index for chaining a
//! longer logical payload, and an optional datagram source address.
//! Nodes are addressed by [`BufferId`] rather than pointers; the chain
//! link is an index, not a reference.
//!
//! Allocation is bounded by a byte budget. A request that does not fit
//! retries at halved sizes down to [`MIN_BUFFER_SIZE`] before giving
//! up, so a large announcement degrades to chained smaller nodes
//! instead of failing outright.

use tracing::warn;

/// Smallest node the halving retry will fall back to.
pub const MIN_BUFFER_SIZE: usize = 64;

/// Handle to one pool node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(usize);

#[derive(Debug)]
struct BufNode {
    /// Outstanding references; the node is freed exactly when this
    /// reaches zero.
    refs: u32,
    /// Payload storage; `capacity` is what was reserved from the budget.
    data: Vec<u8>,
    capacity: usize,
    /// Explicit chain link to the next node of the same payload.
    next: Option<BufferId>,
    /// Source address for datagram receipts.
    source: Option<(String, u16)>,
}

/// The pool: an arena of nodes plus a free list and budget accounting.
#[derive(Debug)]
pub struct BufferPool {
    nodes: Vec<Option<BufNode>>,
    free: Vec<usize>,
    budget: usize,
    in_use: usize,
}

impl BufferPool {
    /// Create a pool with the given byte budget.
    pub fn new(budget: usize) -> Self {
        BufferPool {
            nodes: Vec::new(),
            free: Vec::new(),
            budget,
            in_use: 0,
        }
    }

    /// Allocate a node of up to `requested` bytes.
    ///
    /// Retries at halved sizes down to [`MIN_BUFFER_SIZE`] when the
    /// budget is short. Returns the node with one reference held.
    pub fn alloc(&mut self, requested: usize) -> Option<BufferId> {
        let mut size = requested.max(1);
        loop {
            if self.in_use + size <= self.budget {
                break;
            }
            if size <= MIN_BUFFER_SIZE {
                warn!(requested, in_use = self.in_use, "buffer pool exhausted");
                return None;
            }
            size = (size / 2).max(MIN_BUFFER_SIZE);
        }

        self.in_use += size;
        let node = BufNode {
            refs: 1,
            data: Vec::with_capacity(size),
            capacity: size,
            next: None,
            source: None,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.nodes[index] = Some(node);
                index
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        Some(BufferId(index))
    }

    /// Take one more reference on a node.
    pub fn retain(&mut self, id: BufferId) {
        if let Some(node) = self.node_mut(id) {
            node.refs += 1;
        }
    }

    /// Drop one reference; frees the node (and releases its chain tail)
    /// at zero. Returns `true` when this call freed the node.
    pub fn release(&mut self, id: BufferId) -> bool {
        let Some(node) = self.node_mut(id) else {
            warn!(?id, "release of an already-freed buffer");
            return false;
        };
        node.refs -= 1;
        if node.refs > 0 {
            return false;
        }
        if let Some(node) = self.nodes[id.0].take() {
            self.in_use -= node.capacity;
            self.free.push(id.0);
            if let Some(next) = node.next {
                self.release(next);
            }
        }
        true
    }

    /// Append bytes to a node, up to its reserved capacity. Returns the
    /// number of bytes actually written.
    pub fn append(&mut self, id: BufferId, data: &[u8]) -> usize {
        match self.node_mut(id) {
            Some(node) => {
                let room = node.capacity - node.data.len();
                let take = room.min(data.len());
                node.data.extend_from_slice(&data[..take]);
                take
            }
            None => 0,
        }
    }

    /// Bytes still writable in a node.
    pub fn remaining_capacity(&self, id: BufferId) -> usize {
        self.node(id).map_or(0, |n| n.capacity - n.data.len())
    }

    /// The payload bytes of a node.
    pub fn data(&self, id: BufferId) -> Option<&[u8]> {
        self.node(id).map(|n| n.data.as_slice())
    }

    /// Payload length of a node.
    pub fn len(&self, id: BufferId) -> usize {
        self.node(id).map_or(0, |n| n.data.len())
    }

    /// Whether the node holds no bytes.
    pub fn is_empty(&self, id: BufferId) -> bool {
        self.len(id) == 0
    }

    /// Link `next` after `id` in a chain.
    pub fn set_next(&mut self, id: BufferId, next: BufferId) {
        if let Some(node) = self.node_mut(id) {
            node.next = Some(next);
        }
    }

    /// The chain link of a node.
    pub fn next(&self, id: BufferId) -> Option<BufferId> {
        self.node(id).and_then(|n| n.next)
    }

    /// Record the datagram source address of a node.
    pub fn set_source(&mut self, id: BufferId, host: String, port: u16) {
        if let Some(node) = self.node_mut(id) {
            node.source = Some((host, port));
        }
    }

    /// The datagram source address of a node, if any.
    pub fn source(&self, id: BufferId) -> Option<&(String, u16)> {
        self.node(id).and_then(|n| n.source.as_ref())
    }

    /// Total payload length across a chain.
    pub fn chain_len(&self, id: BufferId) -> usize {
        let mut total = 0;
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            total += self.len(current);
            cursor = self.next(current);
        }
        total
    }

    /// Outstanding references on a node (0 when freed).
    pub fn refs(&self, id: BufferId) -> u32 {
        self.node(id).map_or(0, |n| n.refs)
    }

    /// Bytes currently reserved from the budget.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    fn node(&self, id: BufferId) -> Option<&BufNode> {
        self.nodes.get(id.0).and_then(|n| n.as_ref())
    }

    fn node_mut(&mut self, id: BufferId) -> Option<&mut BufNode> {
        self.nodes.get_mut(id.0).and_then(|n| n.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_release_frees_exactly_once() {
        let mut pool = BufferPool::new(1024);
        let id = pool.alloc(256).unwrap();
        assert_eq!(pool.in_use(), 256);
        assert_eq!(pool.refs(id), 1);
        assert!(pool.release(id));
        assert_eq!(pool.in_use(), 0);
        // A second release of the same id is rejected, not double-freed.
        assert!(!pool.release(id));
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_release_count_matches_reference_count() {
        let mut pool = BufferPool::new(1024);
        let id = pool.alloc(128).unwrap();
        pool.retain(id);
        pool.retain(id);
        assert_eq!(pool.refs(id), 3);
        assert!(!pool.release(id));
        assert!(!pool.release(id));
        assert!(pool.release(id));
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_halving_retry() {
        let mut pool = BufferPool::new(300);
        // 600 does not fit; 300 does.
        let id = pool.alloc(600).unwrap();
        assert_eq!(pool.remaining_capacity(id), 300);
        assert_eq!(pool.in_use(), 300);
    }

    #[test]
    fn test_floor_gives_up() {
        let mut pool = BufferPool::new(1024);
        let big = pool.alloc(1024).unwrap();
        // Nothing left: even the floor does not fit.
        assert!(pool.alloc(512).is_none());
        pool.release(big);
        assert!(pool.alloc(512).is_some());
    }

    #[test]
    fn test_append_respects_capacity() {
        let mut pool = BufferPool::new(64);
        let id = pool.alloc(64).unwrap();
        let written = pool.append(id, &[0u8; 100]);
        assert_eq!(written, 64);
        assert_eq!(pool.remaining_capacity(id), 0);
        assert_eq!(pool.append(id, &[1u8; 4]), 0);
    }

    #[test]
    fn test_chain_release() {
        let mut pool = BufferPool::new(1024);
        let head = pool.alloc(100).unwrap();
        let tail = pool.alloc(100).unwrap();
        pool.set_next(head, tail);
        pool.append(head, &[0u8; 100]);
        pool.append(tail, &[0u8; 50]);
        assert_eq!(pool.chain_len(head), 150);
        // Releasing the head releases the whole chain.
        assert!(pool.release(head));
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.refs(tail), 0);
    }

    #[test]
    fn test_datagram_source() {
        let mut pool = BufferPool::new(256);
        let id = pool.alloc(64).unwrap();
        pool.set_source(id, "10.0.0.9".to_string(), 5683);
        assert_eq!(pool.source(id), Some(&("10.0.0.9".to_string(), 5683)));
    }
}
