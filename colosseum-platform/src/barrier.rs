// SPDX-License-Identifier: Apache-2.0

use colosseum_core::Barrier;
use std::sync::{Condvar, Mutex};

/// Condvar-based implementation of the worker wakeup barrier described in
/// `spec.md` §5: "one condition variable + mutex pair."
#[derive(Default)]
pub struct CondvarBarrier {
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl Barrier for CondvarBarrier {
    fn wait_until(&self, predicate: &dyn Fn() -> bool) {
        let mut guard = self.mutex.lock().unwrap_or_else(|e| e.into_inner());
        while !predicate() {
            guard = self
                .condvar
                .wait(guard)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    fn notify(&self) {
        let _guard = self.mutex.lock().unwrap_or_else(|e| e.into_inner());
        self.condvar.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn wakes_waiter_on_notify() {
        let barrier = Arc::new(CondvarBarrier::default());
        let ready = Arc::new(AtomicBool::new(false));

        let waiter = {
            let barrier = barrier.clone();
            let ready = ready.clone();
            std::thread::spawn(move || {
                barrier.wait_until(&|| ready.load(Ordering::Acquire));
            })
        };

        std::thread::sleep(Duration::from_millis(10));
        ready.store(true, Ordering::Release);
        barrier.notify();

        waiter.join().unwrap();
    }
}
