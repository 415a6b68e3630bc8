// SPDX-License-Identifier: Apache-2.0

//! A thread-safe general-purpose heap allocator sitting directly on
//! anonymous virtual-memory mapping, intended for multi-threaded workloads
//! where contention on a single free list is the dominant cost.
//!
//! This crate is the facade over [`colosseum_core::Colosseum`]: it owns
//! the process-wide instance, exposes the three-function C ABI
//! (`allocate`/`free`/`reallocate`), and wires up the real OS collaborators
//! from `colosseum-platform`. See `colosseum_core` for the algorithm.

use colosseum_core::{Colosseum, Config};
use colosseum_platform::{cpu_count, CondvarBarrier, MmapPageSource};
use once_cell::sync::OnceCell;
use std::ptr::NonNull;
use std::sync::{Arc, Once};
use tracing::warn;

static INSTANCE: OnceCell<Colosseum> = OnceCell::new();
static INIT: Once = Once::new();

fn instance() -> &'static Colosseum {
    INIT.call_once(init_instance);
    // `init_instance` always populates `INSTANCE` before returning, so this
    // can't observe an empty cell.
    INSTANCE.get().expect("colosseum not initialized")
}

fn init_instance() {
    let config = Config::default();
    let page_source: Arc<dyn colosseum_core::PageSource> = Arc::new(MmapPageSource::new());
    let barrier: Arc<dyn colosseum_core::Barrier> = Arc::new(CondvarBarrier::default());
    let colosseum = Colosseum::with_config(config, cpu_count(), page_source, barrier);
    // `INIT` already guarantees this runs exactly once.
    let _ = INSTANCE.set(colosseum);
}

/// Explicit process-lifecycle hook. Idempotent; safe to call more than
/// once or not at all (the instance lazily initializes on first use).
#[no_mangle]
pub extern "C" fn init() {
    instance();
}

/// Explicit process-lifecycle hook. Sets the shutdown flag, wakes the
/// maintenance worker, and joins it. Idempotent: a second call after the
/// worker has already joined is a no-op.
///
/// A `free` invoked after `shutdown` has joined the worker still splices
/// its block onto the handoff queue; that queue is simply never drained
/// again, so the block leaks until process exit. This is the "shutdown
/// race" classification in `spec.md` §7 and is tolerated, not guarded
/// against.
#[no_mangle]
pub extern "C" fn shutdown() {
    if let Some(colosseum) = INSTANCE.get() {
        colosseum.shutdown();
    }
}

/// Allocates at least `size` bytes. Returns null on OS mapping failure.
/// `allocate(0)` returns a valid, unique-at-the-time pointer; callers must
/// not rely on it being distinct from any other zero-byte allocation's
/// pointer after both are freed (`spec.md` §6, Open Question (a)).
#[no_mangle]
pub extern "C" fn allocate(size: usize) -> *mut u8 {
    match instance().allocate(size) {
        Ok(ptr) => ptr.as_ptr(),
        Err(err) => {
            warn!(%err, size, "allocation failed");
            std::ptr::null_mut()
        }
    }
}

/// Frees a pointer previously returned by `allocate` or `reallocate`.
/// `free(null)` is a no-op. Freeing any other invalid pointer is undefined
/// behavior (`spec.md` §7).
#[no_mangle]
pub extern "C" fn free(ptr: *mut u8) {
    let Some(ptr) = NonNull::new(ptr) else {
        return;
    };
    unsafe { instance().free(ptr) };
}

/// Shrinks, grows, or no-ops a live allocation; see `spec.md` §4.6. A null
/// `ptr` behaves like `allocate(size)`; a zero `size` behaves like
/// `free(ptr)` followed by returning null, matching common C `realloc`
/// convention.
#[no_mangle]
pub extern "C" fn reallocate(ptr: *mut u8, size: usize) -> *mut u8 {
    let Some(ptr) = NonNull::new(ptr) else {
        return allocate(size);
    };
    if size == 0 {
        unsafe { instance().free(ptr) };
        return std::ptr::null_mut();
    }
    match unsafe { instance().reallocate(ptr, size) } {
        Ok(new_ptr) => new_ptr.as_ptr(),
        Err(err) => {
            warn!(%err, size, "reallocation failed");
            std::ptr::null_mut()
        }
    }
}

/// [`std::alloc::GlobalAlloc`] adapter so the crate can also be installed
/// with `#[global_allocator]` instead of used through the C ABI directly.
pub struct GlobalColosseum;

unsafe impl std::alloc::GlobalAlloc for GlobalColosseum {
    unsafe fn alloc(&self, layout: std::alloc::Layout) -> *mut u8 {
        allocate(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: std::alloc::Layout) {
        free(ptr);
    }

    unsafe fn realloc(&self, ptr: *mut u8, _layout: std::alloc::Layout, new_size: usize) -> *mut u8 {
        reallocate(ptr, new_size)
    }
}
