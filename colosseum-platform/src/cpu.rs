// SPDX-License-Identifier: Apache-2.0

/// Queries the number of CPUs available to this process, falling back to
/// one on platforms where the query fails.
pub fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
