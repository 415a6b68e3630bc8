// SPDX-License-Identifier: Apache-2.0

//! Concrete implementations of the OS collaborators `colosseum-core`
//! models abstractly: anonymous page mapping, the CPU-count query, and the
//! condvar-based maintenance-worker barrier.

mod barrier;
mod cpu;
mod mmap;

pub use crate::barrier::CondvarBarrier;
pub use crate::cpu::cpu_count;
pub use crate::mmap::MmapPageSource;
