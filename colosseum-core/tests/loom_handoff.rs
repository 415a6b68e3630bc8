// SPDX-License-Identifier: Apache-2.0

//! Concurrency model checks for the handoff queue and the worker barrier's
//! wakeup predicate, exhaustively explored under `loom` instead of relying
//! on a single lucky thread interleaving.
//!
//! Run with:
//! `RUSTFLAGS="--cfg loom" cargo test --features loom --test loom_handoff`
//!
//! Compiled out entirely otherwise, since `loom`'s `Mutex`/`AtomicUsize`
//! are only linked into `colosseum-core` under the `loom` cfg (see
//! `src/sync.rs`), and `loom::model` is the only valid way to drive a
//! `loom`-instrumented type.

#![cfg(loom)]

use colosseum_core::handoff::HandoffQueue;
use colosseum_core::layout::{FreeNode, FREE_NODE_SIZE};
use loom::sync::Arc;
use loom::thread;
use std::alloc::{alloc, Layout};
use std::ptr::NonNull;

unsafe fn make_node(size: usize) -> NonNull<FreeNode> {
    let layout = Layout::from_size_align(FREE_NODE_SIZE + size, 16).unwrap();
    let ptr = NonNull::new(alloc(layout)).unwrap();
    FreeNode::write(ptr.cast(), size, None)
}

/// Two producers enqueue concurrently, one consumer drains until both have
/// definitely landed; the queue's `len`/`frees` bookkeeping must agree no
/// matter how the two enqueues interleave with each other or the drain.
#[test]
fn concurrent_enqueue_is_never_lost() {
    loom::model(|| {
        let queue = Arc::new(HandoffQueue::default());

        let producers: Vec<_> = (0..2)
            .map(|i| {
                let queue = queue.clone();
                thread::spawn(move || {
                    let node = unsafe { make_node(8 + i) };
                    queue.enqueue(node);
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }

        assert_eq!(queue.frees(), 2);
        let mut drained = 0;
        while queue.dequeue_head().is_some() {
            drained += 1;
        }
        assert_eq!(drained, 2);
        assert!(queue.is_empty());
    });
}

/// `has_pending_work` must observe a `frees()` bump from another thread
/// after that thread's `enqueue` has returned — the property the worker's
/// barrier predicate depends on to avoid missing a wakeup.
#[test]
fn pending_work_visible_after_enqueue_returns() {
    loom::model(|| {
        let queue = Arc::new(HandoffQueue::default());
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let node = unsafe { make_node(8) };
                queue.enqueue(node);
            })
        };

        producer.join().unwrap();
        assert!(queue.has_pending_work());
    });
}
