// SPDX-License-Identifier: Apache-2.0

/// Errors surfaced by the allocator's public operations.
///
/// [`AllocError::Corrupted`] is reserved for invariant violations found by
/// the maintenance worker; callers never recover from it; it is logged and
/// the process aborts (see [`crate::worker`]).
#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    #[error("page source exhausted while mapping {pages} page(s)")]
    OutOfMemory { pages: usize },

    #[error("structural corruption detected: {detail}")]
    Corrupted { detail: &'static str },
}

pub type Result<T> = core::result::Result<T, AllocError>;
