//! Shared counters under parallel mutation.
//!
//! The unsynchronized variant performs increment as a separate load and store,
//! the same read-modify-write hazard an unguarded consumer has when it reads
//! "not processed", acts, then writes. Concurrent callers can interleave between
//! the load and the store and lose updates. The synchronized variants make the
//! whole step a single critical section.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Barrier;
use std::thread;

/// Integer counter shared across threads
pub trait SharedCounter: Send + Sync {
    fn increment(&self);
    fn read(&self) -> u64;
}

/// Counter whose increment is a non-atomic load / add / store
///
/// Memory safe, but concurrent increments may be lost.
#[derive(Debug, Default)]
pub struct UnsyncCounter {
    value: AtomicU64,
}

impl UnsyncCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SharedCounter for UnsyncCounter {
    fn increment(&self) {
        let current = self.value.load(Ordering::Relaxed);
        std::hint::spin_loop();
        self.value.store(current + 1, Ordering::Relaxed);
    }

    fn read(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counter guarded by a single mutex covering both increment and read
#[derive(Debug, Default)]
pub struct MutexCounter {
    value: Mutex<u64>,
}

impl MutexCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SharedCounter for MutexCounter {
    fn increment(&self) {
        *self.value.lock() += 1;
    }

    fn read(&self) -> u64 {
        *self.value.lock()
    }
}

/// Counter backed by a hardware fetch-and-add
#[derive(Debug, Default)]
pub struct AtomicCounter {
    value: AtomicU64,
}

impl AtomicCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SharedCounter for AtomicCounter {
    fn increment(&self) {
        self.value.fetch_add(1, Ordering::SeqCst);
    }

    fn read(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

/// Run `actors` threads, each calling `increment` `increments` times
///
/// All threads are released together from a barrier to maximise overlap.
/// Returns the counter's final value.
pub fn hammer<C: SharedCounter + ?Sized>(counter: &C, actors: usize, increments: usize) -> u64 {
    let barrier = Barrier::new(actors);

    thread::scope(|scope| {
        for _ in 0..actors {
            scope.spawn(|| {
                barrier.wait();
                for _ in 0..increments {
                    counter.increment();
                }
            });
        }
    });

    counter.read()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_thread_counts_exactly() {
        let counters: Vec<Box<dyn SharedCounter>> = vec![
            Box::new(UnsyncCounter::new()),
            Box::new(MutexCounter::new()),
            Box::new(AtomicCounter::new()),
        ];

        for counter in counters {
            for _ in 0..100 {
                counter.increment();
            }
            assert_eq!(counter.read(), 100);
        }
    }

    #[test]
    fn test_hammer_returns_final_value() {
        let counter = AtomicCounter::new();
        assert_eq!(hammer(&counter, 4, 250), 1000);
    }
}
