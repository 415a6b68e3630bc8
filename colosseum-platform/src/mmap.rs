// SPDX-License-Identifier: Apache-2.0

use colosseum_core::{AllocError, PageSource, RawRegion, Result};
use std::ptr::NonNull;
use tracing::{trace, warn};

/// Anonymous, privately-mapped, zero-initialized page source.
///
/// The only concrete implementation of [`PageSource`] shipped in this
/// workspace; `colosseum-core` stays testable against an in-memory fake
/// without depending on this crate.
#[derive(Debug, Default)]
pub struct MmapPageSource {
    page_size: usize,
}

impl MmapPageSource {
    pub fn new() -> Self {
        Self {
            page_size: query_page_size(),
        }
    }
}

impl PageSource for MmapPageSource {
    #[inline]
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn map_pages(&self, n: usize) -> Result<RawRegion> {
        let len = n * self.page_size;
        debug_assert!(len > 0);

        // SAFETY: MAP_ANONYMOUS with a null address lets the kernel pick
        // the mapping; MAP_PRIVATE means it is never shared with another
        // process. Anonymous mappings are zero-filled by the kernel, so no
        // explicit zeroing pass is needed.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if addr == libc::MAP_FAILED {
            warn!(pages = n, "mmap failed while mapping fresh pages");
            return Err(AllocError::OutOfMemory { pages: n });
        }

        let ptr = NonNull::new(addr as *mut u8).ok_or(AllocError::OutOfMemory { pages: n })?;
        trace!(pages = n, len, "mapped fresh pages");
        Ok(RawRegion::new(ptr, len))
    }

    unsafe fn unmap_pages(&self, region: RawRegion) {
        debug_assert_eq!(region.len % self.page_size, 0);
        let rc = libc::munmap(region.ptr.as_ptr().cast(), region.len);
        debug_assert_eq!(rc, 0, "munmap failed on a region we previously mapped");
        trace!(len = region.len, "unmapped pages");
    }
}

#[cfg(unix)]
fn query_page_size() -> usize {
    // SAFETY: sysconf with _SC_PAGESIZE has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

#[cfg(not(unix))]
fn query_page_size() -> usize {
    4096
}
