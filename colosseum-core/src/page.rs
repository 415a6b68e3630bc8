// SPDX-License-Identifier: Apache-2.0

use crate::error::{AllocError, Result};
use core::ptr::NonNull;

/// A page-aligned, zero-initialized, read-write region obtained from a
/// [`PageSource`].
///
/// `RawRegion`s are the only unit that may ever be returned to the OS: a
/// region is either entirely covered by one free node, entirely covered by
/// one live allocation, or (for the large-allocation path) unmapped as a
/// whole. [`RawRegion`] itself is a bookkeeping value, not an owning
/// smart pointer — the allocator tracks the memory it describes through
/// free nodes and headers, not through this type's lifetime.
#[derive(Debug, Clone, Copy)]
pub struct RawRegion {
    pub ptr: NonNull<u8>,
    pub len: usize,
}

impl RawRegion {
    #[inline]
    pub fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }
}

/// Out-of-scope collaborator: the OS page mapping interface.
///
/// Modeled abstractly so [`crate::Colosseum`] can run against an in-memory
/// fake in tests without touching the real address space. The production
/// implementation lives in the `colosseum-platform` crate over anonymous
/// `mmap`/`munmap`.
pub trait PageSource: Send + Sync {
    /// System page size, in bytes. Assumed constant for the process lifetime.
    fn page_size(&self) -> usize;

    /// Maps `n` whole pages of zero-initialized, read-write memory.
    fn map_pages(&self, n: usize) -> Result<RawRegion>;

    /// Unmaps a region previously returned by `map_pages`.
    ///
    /// # Safety
    /// `region` must have been returned by this same `PageSource`'s
    /// `map_pages`, must not have been unmapped already, and must not be
    /// referenced by any live allocation or free node after this call.
    unsafe fn unmap_pages(&self, region: RawRegion);

    /// Rounds `bytes` up to a whole number of pages and returns the page
    /// count.
    #[inline]
    fn pages_for(&self, bytes: usize) -> usize {
        let page_size = self.page_size();
        bytes.div_ceil(page_size)
    }
}
