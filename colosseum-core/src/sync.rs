// SPDX-License-Identifier: Apache-2.0

//! Indirection over the concurrency primitives used throughout this crate.
//!
//! Under the `loom` feature (and only then — this is a test-only
//! configuration, never a production build) every primitive below is
//! swapped for its `loom` equivalent, so `cargo test --features loom`
//! under `RUSTFLAGS="--cfg loom"` can exhaustively model the handoff
//! queue and worker barrier's interleavings instead of merely running
//! them once.

cfg_if::cfg_if! {
    if #[cfg(loom)] {
        pub use loom::sync::{Arc, Condvar, Mutex, MutexGuard, TryLockError};
        pub use loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
        pub use loom::thread;
    } else {
        pub use std::sync::{Arc, Condvar, Mutex, MutexGuard, TryLockError};
        pub use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
        pub use std::thread;
    }
}

/// `Mutex::lock` panics on poisoning under `loom` (it has no poisoning
/// concept); under `std` a poisoned lock is recovered rather than
/// propagated, since no single-arena's bookkeeping invariant depends on
/// whatever a panicking holder left behind elsewhere.
#[inline]
pub fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    #[cfg(loom)]
    {
        mutex.lock().unwrap()
    }
    #[cfg(not(loom))]
    {
        mutex.lock().unwrap_or_else(|e| e.into_inner())
    }
}
