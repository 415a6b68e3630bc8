// SPDX-License-Identifier: Apache-2.0

use core::mem::size_of;
use core::ptr::NonNull;

/// Fixed-width record placed at the start of every live allocation.
///
/// The pointer returned to the caller always points at the first byte past
/// a header. `size` is the payload size in bytes and is included in all
/// size accounting elsewhere in the crate.
#[repr(C)]
#[derive(Debug)]
pub struct AllocHeader {
    pub size: usize,
}

/// Fixed-width record placed at the start of every free region.
///
/// `size` is the size of the free region in bytes, *not* counting the node
/// header itself. `next` links to the next free node in the same arena, or
/// is null at the tail.
#[repr(C)]
#[derive(Debug)]
pub struct FreeNode {
    pub size: usize,
    pub next: Option<NonNull<FreeNode>>,
}

pub const HEADER_SIZE: usize = size_of::<AllocHeader>();
pub const FREE_NODE_SIZE: usize = size_of::<FreeNode>();

impl AllocHeader {
    /// Writes a header in place at `at` and returns the payload pointer.
    ///
    /// # Safety
    /// `at` must point to at least `HEADER_SIZE + size` writable bytes that
    /// the allocator exclusively owns.
    #[inline]
    pub unsafe fn write(at: NonNull<u8>, size: usize) -> NonNull<u8> {
        let header = at.cast::<AllocHeader>();
        header.as_ptr().write(AllocHeader { size });
        NonNull::new_unchecked(at.as_ptr().add(HEADER_SIZE))
    }

    /// Recovers the header immediately preceding a payload pointer returned
    /// by [`AllocHeader::write`].
    ///
    /// # Safety
    /// `payload` must be a pointer previously returned to a caller by
    /// `allocate`/`reallocate` and must not have been freed.
    #[inline]
    pub unsafe fn header_of(payload: NonNull<u8>) -> NonNull<AllocHeader> {
        NonNull::new_unchecked(payload.as_ptr().sub(HEADER_SIZE)).cast()
    }
}

impl FreeNode {
    /// Writes a free node in place at `at`.
    ///
    /// # Safety
    /// `at` must point to at least `FREE_NODE_SIZE + size` bytes owned by
    /// the allocator and containing no live user data.
    #[inline]
    pub unsafe fn write(at: NonNull<u8>, size: usize, next: Option<NonNull<FreeNode>>) -> NonNull<FreeNode> {
        let node = at.cast::<FreeNode>();
        node.as_ptr().write(FreeNode { size, next });
        node
    }

    /// Total span of this node, header included.
    #[inline]
    pub fn span(size: usize) -> usize {
        FREE_NODE_SIZE + size
    }

    /// Address one byte past the end of this node's span.
    #[inline]
    pub fn end_addr(node: NonNull<FreeNode>, size: usize) -> usize {
        node.as_ptr() as usize + Self::span(size)
    }
}
