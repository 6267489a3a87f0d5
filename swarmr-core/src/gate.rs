use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Decides whether a virtual user may start another iteration.
///
/// Stops on whichever budget runs out first: the iteration count or the run deadline.
/// With neither set, it never stops by itself.
#[derive(Debug)]
pub struct IterationGate {
    counter: AtomicU64,
    iterations: Option<u64>,
    deadline: Option<Instant>,
}

impl IterationGate {
    pub fn new(iterations: Option<u64>, deadline: Option<Instant>) -> Self {
        Self {
            counter: AtomicU64::new(0),
            iterations,
            deadline,
        }
    }

    pub fn next(&self) -> bool {
        self.next_at(Instant::now())
    }

    pub fn next_at(&self, now: Instant) -> bool {
        if self.expired_at(now) {
            return false;
        }

        if let Some(total) = self.iterations {
            let idx = self.counter.fetch_add(1, Ordering::Relaxed);
            if idx >= total {
                return false;
            }
        }

        true
    }

    pub fn expired_at(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Iterations let through so far.
    pub fn started(&self) -> u64 {
        let n = self.counter.load(Ordering::Relaxed);
        self.iterations.map_or(n, |total| n.min(total))
    }
}
