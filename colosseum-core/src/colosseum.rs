// SPDX-License-Identifier: Apache-2.0

use crate::arena::Arena;
use crate::barrier::Barrier;
use crate::config::Config;
use crate::error::{AllocError, Result};
use crate::handoff::HandoffQueue;
use crate::layout::{AllocHeader, FreeNode, FREE_NODE_SIZE, HEADER_SIZE};
use crate::page::{PageSource, RawRegion};
use crate::sync::{self, AtomicBool, Arc, Ordering};
use crate::worker::{self, UnmapHysteresis};
use core::ptr::NonNull;
use tracing::debug;

/// The top-level aggregate owning every arena, the handoff queue, and the
/// single maintenance worker thread.
///
/// Created once at process startup via [`Colosseum::with_config`] and torn
/// down via [`Colosseum::shutdown`]; see `spec.md` §4.7.
pub struct Colosseum {
    arenas: Arc<Vec<Arena>>,
    handoff: Arc<HandoffQueue>,
    page_source: Arc<dyn PageSource>,
    barrier: Arc<dyn Barrier>,
    hysteresis: Arc<UnmapHysteresis>,
    shutdown: Arc<AtomicBool>,
    worker: sync::Mutex<Option<crate::sync::thread::JoinHandle<()>>>,
}

/// Minimum payload size accepted by [`Colosseum::allocate`].
///
/// Every live allocation must later be convertible in place into a free
/// node on [`Colosseum::free`] (`spec.md` §4.2), which needs `FREE_NODE_SIZE`
/// bytes for the node's own header. Requests smaller than this are rounded
/// up, matching the "rounded per the allocator's own splitting rules"
/// clause in `spec.md` §8 item 2.
const MIN_PAYLOAD: usize = {
    if FREE_NODE_SIZE > HEADER_SIZE {
        FREE_NODE_SIZE - HEADER_SIZE
    } else {
        0
    }
};

impl Colosseum {
    pub fn with_config(
        config: Config,
        cpu_count: usize,
        page_source: Arc<dyn PageSource>,
        barrier: Arc<dyn Barrier>,
    ) -> Self {
        let arena_count = config.arena_count(cpu_count);
        let arenas = Arc::new((0..arena_count).map(|_| Arena::default()).collect());
        let handoff = Arc::new(HandoffQueue::default());
        let hysteresis = Arc::new(UnmapHysteresis::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        debug!(arena_count, "colosseum initialized");

        let worker = worker::spawn(
            arenas.clone(),
            handoff.clone(),
            page_source.clone(),
            barrier.clone(),
            hysteresis.clone(),
            shutdown.clone(),
        );

        Self {
            arenas,
            handoff,
            page_source,
            barrier,
            hysteresis,
            shutdown,
            worker: sync::Mutex::new(Some(worker)),
        }
    }

    /// Scans arenas for one with enough aggregate free space whose mutex is
    /// free; carves on a hit. Falls back to mapping fresh pages directly
    /// when every arena misses, or when a selected arena's optimistic
    /// aggregate-size check doesn't pan out into an actual fit (aggregate
    /// size is a sum, not a max, so no single node is guaranteed to fit).
    pub fn allocate(&self, bytes: usize) -> Result<NonNull<u8>> {
        let payload_size = bytes.max(MIN_PAYLOAD);
        let total = HEADER_SIZE + payload_size;

        for arena in self.arenas.iter() {
            if let Some(mut guard) = arena.try_acquire_for_size(total) {
                if let Some((region_start, _span)) = guard.carve(total) {
                    drop(guard);
                    return Ok(unsafe { AllocHeader::write(region_start, payload_size) });
                }
                drop(guard);
                return self.map_fresh(payload_size);
            }
        }

        self.map_fresh(payload_size)
    }

    /// Maps fresh pages for a `payload_size`-byte allocation and writes its
    /// header in place, returning the payload pointer.
    ///
    /// Page count is rounded up from `HEADER_SIZE + payload_size`. A
    /// request whose payload already meets `free`'s large-allocation
    /// threshold (`payload_size >= page_size - HEADER_SIZE`) is certain to
    /// take `free`'s unmap-the-whole-region path later, which recomputes
    /// the mapped page count purely from the header's own `size` field —
    /// so here the entire mapped region is folded into the payload instead
    /// of carving a leftover free node out of it, or that node would be
    /// left dangling the moment `free` unmaps the region out from under it.
    /// Everything else is bumped by one more page if the leftover would be
    /// smaller than one free-node header, with any leftover becoming a new
    /// free node pushed to the handoff queue as usual.
    fn map_fresh(&self, payload_size: usize) -> Result<NonNull<u8>> {
        let page_size = self.page_source.page_size();
        let total = HEADER_SIZE + payload_size;
        let large = payload_size >= page_size - HEADER_SIZE;

        let mut pages = self.page_source.pages_for(total);
        let mut mapped_len = pages * page_size;
        if !large && mapped_len - total < FREE_NODE_SIZE {
            pages += 1;
            mapped_len = pages * page_size;
        }

        let region = self
            .page_source
            .map_pages(pages)
            .map_err(|_| AllocError::OutOfMemory { pages })?;
        self.hysteresis.toggle_on_map();

        if large {
            let full_payload = mapped_len - HEADER_SIZE;
            return Ok(unsafe { AllocHeader::write(region.ptr, full_payload) });
        }

        let leftover = mapped_len - total;
        if leftover >= FREE_NODE_SIZE {
            let node_start = unsafe { NonNull::new_unchecked(region.ptr.as_ptr().add(total)) };
            let node = unsafe { FreeNode::write(node_start, leftover - FREE_NODE_SIZE, None) };
            self.handoff.enqueue(node);
            self.barrier.notify();
        }

        Ok(unsafe { AllocHeader::write(region.ptr, payload_size) })
    }

    /// Reads the header at `ptr - HEADER_SIZE`. Large allocations (payload
    /// at least `page_size - HEADER_SIZE`) are unmapped immediately;
    /// everything else becomes a free node pushed to the handoff queue.
    ///
    /// # Safety
    /// `ptr` must be a pointer previously returned by `allocate` or
    /// `reallocate` on this `Colosseum` and must not already have been
    /// freed.
    pub unsafe fn free(&self, ptr: NonNull<u8>) {
        let header = AllocHeader::header_of(ptr);
        let payload_size = header.as_ref().size;
        let page_size = self.page_source.page_size();

        if payload_size >= page_size - HEADER_SIZE {
            let total = HEADER_SIZE + payload_size;
            let pages = self.page_source.pages_for(total);
            let region = RawRegion::new(header.cast(), pages * page_size);
            self.page_source.unmap_pages(region);
            self.hysteresis.toggle_on_map();
            return;
        }

        let node_size = payload_size - (FREE_NODE_SIZE - HEADER_SIZE);
        let node = FreeNode::write(header.cast(), node_size, None);
        self.handoff.enqueue(node);
        self.barrier.notify();
    }

    /// Shrink, grow, or no-op reallocation; see `spec.md` §4.6.
    ///
    /// # Safety
    /// Same requirement on `ptr` as [`Colosseum::free`].
    pub unsafe fn reallocate(&self, ptr: NonNull<u8>, new_bytes: usize) -> Result<NonNull<u8>> {
        let header = AllocHeader::header_of(ptr);
        let old_size = header.as_ref().size;
        let new_payload = new_bytes.max(MIN_PAYLOAD);

        if new_payload == old_size {
            return Ok(ptr);
        }

        if new_payload < old_size {
            let slack = old_size - new_payload;
            if slack < FREE_NODE_SIZE {
                // Not enough slack to carve a standalone free node; keep
                // the extra bytes as internal fragmentation rather than
                // shrinking at all.
                return Ok(ptr);
            }

            (*header.as_ptr()).size = new_payload;
            let tail_start = unsafe { NonNull::new_unchecked(ptr.as_ptr().add(new_payload)) };
            let tail_node = unsafe { FreeNode::write(tail_start, slack - FREE_NODE_SIZE, None) };
            self.handoff.enqueue(tail_node);
            self.barrier.notify();
            return Ok(ptr);
        }

        let new_ptr = self.allocate(new_bytes)?;
        let to_copy = old_size.min(new_payload);
        unsafe {
            core::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), to_copy);
            self.free(ptr);
        }
        Ok(new_ptr)
    }

    /// Idempotent: sets the shutdown flag, wakes the worker, and joins it.
    /// The worker drains any remaining handoff queue entries before
    /// exiting, so no freed blocks are left stranded mid-shutdown.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.barrier.notify();
        if let Some(handle) = sync::lock(&self.worker).take() {
            let _ = handle.join();
        }
        debug!("colosseum shutdown complete");
    }

    #[cfg(test)]
    pub(crate) fn arenas_for_test(&self) -> &[Arena] {
        &self.arenas
    }

    #[cfg(test)]
    pub(crate) fn handoff_for_test(&self) -> &HandoffQueue {
        &self.handoff
    }
}

impl Drop for Colosseum {
    fn drop(&mut self) {
        self.shutdown();
    }
}
