use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::stats::{StatisticsCollector, StatsLevel};

/// Monotonic (or explicitly settable) run counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Increments by one and returns the new value.
    #[inline]
    pub fn inc(&self) -> u64 {
        self.add(1)
    }

    /// Adds `n` and returns the new value.
    #[inline]
    pub fn add(&self, n: u64) -> u64 {
        self.0.fetch_add(n, Ordering::Relaxed).saturating_add(n)
    }

    /// Decrements by one (saturating at zero) and returns the new value.
    pub fn dec(&self) -> u64 {
        match self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some(cur.saturating_sub(1))
            }) {
            Ok(prev) | Err(prev) => prev.saturating_sub(1),
        }
    }

    #[inline]
    pub fn store(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Settable counters that go up and down during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Gauge {
    ActiveUsers,
    Threads,
}

/// Process-wide execution counters for one run.
///
/// Created once per run and shared by reference (`Arc`) with every virtual user.
/// Nothing is reset while the run is in progress.
#[derive(Debug, Default)]
pub struct ExecutionCounters {
    pub errors: Counter,
    pub warnings: Counter,
    pub actions: Counter,
    pub requests: Counter,
    /// Total sessions (connections) started.
    pub sessions: Counter,
    /// Identity draws handed to the user generator.
    pub users: Counter,
    /// Sessions currently connected.
    pub active_users: Counter,
    /// Virtual-user tasks currently running.
    pub threads: Counter,

    statistics: Option<StatisticsCollector>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CountersSnapshot {
    pub errors: u64,
    pub warnings: u64,
    pub actions: u64,
    pub requests: u64,
    pub sessions: u64,
    pub users: u64,
    pub active_users: u64,
    pub threads: u64,
}

impl ExecutionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters plus a statistics collector. `StatsLevel::Off` keeps only the global counters.
    pub fn with_statistics(level: StatsLevel) -> Self {
        Self {
            statistics: (level != StatsLevel::Off).then(|| StatisticsCollector::new(level)),
            ..Self::default()
        }
    }

    pub fn statistics(&self) -> Option<&StatisticsCollector> {
        self.statistics.as_ref()
    }

    pub fn stats_level(&self) -> StatsLevel {
        self.statistics
            .as_ref()
            .map_or(StatsLevel::Off, StatisticsCollector::level)
    }

    pub fn gauge(&self, gauge: Gauge) -> &Counter {
        match gauge {
            Gauge::ActiveUsers => &self.active_users,
            Gauge::Threads => &self.threads,
        }
    }

    /// Increments `gauge` and returns a guard that decrements it on drop.
    pub fn enter(self: &Arc<Self>, gauge: Gauge) -> ActiveGuard {
        self.gauge(gauge).inc();
        ActiveGuard {
            counters: self.clone(),
            gauge,
        }
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            errors: self.errors.current(),
            warnings: self.warnings.current(),
            actions: self.actions.current(),
            requests: self.requests.current(),
            sessions: self.sessions.current(),
            users: self.users.current(),
            active_users: self.active_users.current(),
            threads: self.threads.current(),
        }
    }
}

pub struct ActiveGuard {
    counters: Arc<ExecutionCounters>,
    gauge: Gauge,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.counters.gauge(self.gauge).dec();
    }
}
