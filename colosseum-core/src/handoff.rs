// SPDX-License-Identifier: Apache-2.0

use crate::layout::FreeNode;
use crate::sync::{self, AtomicUsize, Mutex, Ordering};
use crossbeam_utils::CachePadded;
use core::ptr::NonNull;

/// Single process-wide append-only intake queue fed by freeing threads and
/// drained by the maintenance worker.
///
/// Blocks queued here are not required to be sorted or coalesced; that is
/// the worker's job once it distributes them into arenas. `enqueue`'s
/// critical section is O(1): a mutator holds the queue mutex only long
/// enough to splice one node onto the tail.
pub struct HandoffQueue {
    inner: Mutex<QueueInner>,
    /// Count of nodes ever enqueued. Read by the worker's wait condition.
    frees: CachePadded<AtomicUsize>,
    /// Count of nodes the worker has placed into an arena.
    placed: CachePadded<AtomicUsize>,
}

#[derive(Default)]
struct QueueInner {
    head: Option<NonNull<FreeNode>>,
    tail: Option<NonNull<FreeNode>>,
    len: usize,
}

// SAFETY: nodes are only ever touched while `inner`'s mutex is held, or
// after being uniquely returned from `dequeue_head`.
unsafe impl Send for QueueInner {}

impl Default for HandoffQueue {
    fn default() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            frees: CachePadded::new(AtomicUsize::new(0)),
            placed: CachePadded::new(AtomicUsize::new(0)),
        }
    }
}

impl HandoffQueue {
    /// Appends `node` at the tail. Bumps the `frees` counter the worker's
    /// barrier condition reads.
    pub fn enqueue(&self, mut node: NonNull<FreeNode>) {
        unsafe {
            node.as_mut().next = None;
        }
        let mut inner = sync::lock(&self.inner);
        match inner.tail {
            Some(mut t) => unsafe { t.as_mut().next = Some(node) },
            None => inner.head = Some(node),
        }
        inner.tail = Some(node);
        inner.len += 1;
        drop(inner);
        self.frees.fetch_add(1, Ordering::Release);
    }

    /// Detaches and returns the head node, if any.
    pub fn dequeue_head(&self) -> Option<NonNull<FreeNode>> {
        let mut inner = sync::lock(&self.inner);
        let head = inner.head?;
        let next = unsafe { head.as_ref().next };
        inner.head = next;
        if next.is_none() {
            inner.tail = None;
        }
        inner.len -= 1;
        Some(head)
    }

    pub fn is_empty(&self) -> bool {
        sync::lock(&self.inner).len == 0
    }

    pub fn len(&self) -> usize {
        sync::lock(&self.inner).len
    }

    #[inline]
    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::Acquire)
    }

    #[inline]
    pub fn placed(&self) -> usize {
        self.placed.load(Ordering::Acquire)
    }

    /// Records that the worker has placed `count` more nodes into arenas.
    #[inline]
    pub fn record_placed(&self, count: usize) {
        self.placed.fetch_add(count, Ordering::Release);
    }

    #[inline]
    pub fn has_pending_work(&self) -> bool {
        self.frees() > self.placed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::FREE_NODE_SIZE;
    use std::alloc::{alloc, Layout};

    unsafe fn make_node(size: usize) -> NonNull<FreeNode> {
        let layout = Layout::from_size_align(FREE_NODE_SIZE + size, 16).unwrap();
        let ptr = NonNull::new(alloc(layout)).unwrap();
        FreeNode::write(ptr.cast(), size, None)
    }

    #[test]
    fn fifo_order() {
        let queue = HandoffQueue::default();
        unsafe {
            queue.enqueue(make_node(8));
            queue.enqueue(make_node(16));
        }
        assert_eq!(queue.len(), 2);
        let first = queue.dequeue_head().unwrap();
        assert_eq!(unsafe { first.as_ref().size }, 8);
        let second = queue.dequeue_head().unwrap();
        assert_eq!(unsafe { second.as_ref().size }, 16);
        assert!(queue.dequeue_head().is_none());
    }

    #[test]
    fn frees_and_placed_counters() {
        let queue = HandoffQueue::default();
        unsafe {
            queue.enqueue(make_node(8));
        }
        assert_eq!(queue.frees(), 1);
        assert_eq!(queue.placed(), 0);
        assert!(queue.has_pending_work());
        queue.record_placed(1);
        assert!(!queue.has_pending_work());
    }
}
