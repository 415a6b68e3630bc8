// SPDX-License-Identifier: Apache-2.0

//! Concurrent free-space manager for a sharded, worker-maintained heap
//! allocator.
//!
//! This crate is deliberately OS-agnostic: it depends on a [`PageSource`]
//! for raw memory and a [`Barrier`] for worker wakeup, both narrow traits
//! implemented concretely by the `colosseum-platform` crate. That split
//! lets the arena/handoff/worker logic run against an in-memory fake in
//! tests without touching the real address space.

pub mod arena;
pub mod barrier;
pub mod config;
pub mod error;
pub mod handoff;
pub mod layout;
pub mod page;
pub mod worker;

mod colosseum;
mod sync;

pub use crate::barrier::Barrier;
pub use crate::colosseum::Colosseum;
pub use crate::config::Config;
pub use crate::error::{AllocError, Result};
pub use crate::page::{PageSource, RawRegion};
