use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::counters::Counter;

/// How much per-key detail the collector keeps.
///
/// Chosen once at run start; there is no setter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StatsLevel {
    /// Only the global execution counters.
    #[default]
    Off,
    /// Per-action aggregates.
    On,
    /// Per-action and per-endpoint aggregates.
    Full,
}

impl StatsLevel {
    #[must_use]
    pub fn actions_enabled(self) -> bool {
        self >= Self::On
    }

    #[must_use]
    pub fn requests_enabled(self) -> bool {
        self == Self::Full
    }
}

/// Online (incremental) mean of response times. O(1) memory regardless of sample count.
#[derive(Debug, Default)]
pub struct RespAvg {
    inner: Mutex<MeanAgg>,
}

#[derive(Debug, Default, Clone, Copy)]
struct MeanAgg {
    count: u64,
    mean_us: f64,
}

impl RespAvg {
    pub fn add_sample(&self, sample: Duration) {
        let us = sample.as_secs_f64() * 1_000_000.0;
        if !us.is_finite() {
            return;
        }

        let mut agg = self.inner.lock();
        agg.count = agg.count.saturating_add(1);
        agg.mean_us += (us - agg.mean_us) / (agg.count as f64);
    }

    pub fn count(&self) -> u64 {
        self.inner.lock().count
    }

    pub fn average(&self) -> Option<Duration> {
        let agg = *self.inner.lock();
        (agg.count > 0).then(|| Duration::from_secs_f64(agg.mean_us.max(0.0) / 1_000_000.0))
    }
}

/// Success/failure counts, latency and traffic for one aggregate key.
///
/// Shared by every task that observes the same key, so all mutators are lock-free
/// counters or internally locked.
#[derive(Debug, Default)]
pub struct SampleStats {
    pub success: Counter,
    pub fail: Counter,
    pub resp_avg: RespAvg,
    pub sent: Counter,
    pub received: Counter,
}

impl SampleStats {
    pub fn record(&self, ok: bool, elapsed: Duration, sent: u64, received: u64) {
        if ok {
            self.success.inc();
        } else {
            self.fail.inc();
        }
        self.resp_avg.add_sample(elapsed);
        self.sent.add(sent);
        self.received.add(received);
    }
}

pub type ActionStats = SampleStats;
pub type RequestStats = SampleStats;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionKey {
    pub action: String,
    pub label: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    pub method: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionRow {
    pub key: ActionKey,
    pub success: u64,
    pub fail: u64,
    pub avg: Option<Duration>,
    pub sent: u64,
    pub received: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestRow {
    pub key: RequestKey,
    pub success: u64,
    pub fail: u64,
    pub avg: Option<Duration>,
    pub sent: u64,
    pub received: u64,
}

type StatsMap<K> = DashMap<K, Arc<SampleStats>, ahash::RandomState>;

/// Lazily-populated aggregates keyed by action and by endpoint.
///
/// Entries are created on first observation and never removed during a run.
#[derive(Debug)]
pub struct StatisticsCollector {
    level: StatsLevel,
    actions: StatsMap<ActionKey>,
    requests: StatsMap<RequestKey>,
}

impl StatisticsCollector {
    pub fn new(level: StatsLevel) -> Self {
        Self {
            level,
            actions: DashMap::with_hasher(ahash::RandomState::new()),
            requests: DashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    pub fn level(&self) -> StatsLevel {
        self.level
    }

    /// Returns the shared record for the key, creating it on first use.
    pub fn get_or_add_action_stats(
        &self,
        action: &str,
        label: &str,
        target: &str,
    ) -> Arc<ActionStats> {
        let key = ActionKey {
            action: action.to_string(),
            label: label.to_string(),
            target: target.to_string(),
        };

        if let Some(existing) = self.actions.get(&key) {
            return existing.value().clone();
        }
        self.actions.entry(key).or_default().value().clone()
    }

    /// Returns the shared record for the endpoint, creating it on first use.
    pub fn get_or_add_request_stats(&self, method: &str, path: &str) -> Arc<RequestStats> {
        let key = RequestKey {
            method: method.to_string(),
            path: path.to_string(),
        };

        if let Some(existing) = self.requests.get(&key) {
            return existing.value().clone();
        }
        self.requests.entry(key).or_default().value().clone()
    }

    pub fn action_rows(&self) -> Vec<ActionRow> {
        let mut rows: Vec<ActionRow> = self
            .actions
            .iter()
            .map(|e| {
                let s = e.value();
                ActionRow {
                    key: e.key().clone(),
                    success: s.success.current(),
                    fail: s.fail.current(),
                    avg: s.resp_avg.average(),
                    sent: s.sent.current(),
                    received: s.received.current(),
                }
            })
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }

    pub fn request_rows(&self) -> Vec<RequestRow> {
        let mut rows: Vec<RequestRow> = self
            .requests
            .iter()
            .map(|e| {
                let s = e.value();
                RequestRow {
                    key: e.key().clone(),
                    success: s.success.current(),
                    fail: s.fail.current(),
                    avg: s.resp_avg.average(),
                    sent: s.sent.current(),
                    received: s.received.current(),
                }
            })
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_add_returns_the_same_record() {
        let c = StatisticsCollector::new(StatsLevel::On);
        let a = c.get_or_add_action_stats("openapp", "open", "app-1");
        let b = c.get_or_add_action_stats("openapp", "open", "app-1");
        assert!(Arc::ptr_eq(&a, &b));

        let other = c.get_or_add_action_stats("openapp", "open", "app-2");
        assert!(!Arc::ptr_eq(&a, &other));

        let r1 = c.get_or_add_request_stats("OpenDoc", "/");
        let r2 = c.get_or_add_request_stats("OpenDoc", "/");
        assert!(Arc::ptr_eq(&r1, &r2));
    }

    #[test]
    fn concurrent_adds_on_shared_key_are_not_lost() {
        let c = StatisticsCollector::new(StatsLevel::Full);
        let threads = 8;
        let per_thread = 1_000u64;

        std::thread::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|| {
                    for i in 0..per_thread {
                        let s = c.get_or_add_action_stats("openapp", "open", "app");
                        s.record(i % 2 == 0, Duration::from_millis(10), 3, 5);
                    }
                });
            }
        });

        let s = c.get_or_add_action_stats("openapp", "open", "app");
        let total = threads * per_thread;
        assert_eq!(s.success.current() + s.fail.current(), total);
        assert_eq!(s.success.current(), total / 2);
        assert_eq!(s.resp_avg.count(), total);
        assert_eq!(s.sent.current(), total * 3);
        assert_eq!(s.received.current(), total * 5);
        assert_eq!(c.action_rows().len(), 1);
    }

    #[test]
    fn resp_avg_is_the_running_mean() {
        let avg = RespAvg::default();
        assert_eq!(avg.average(), None);

        for ms in [10u64, 20, 30, 40] {
            avg.add_sample(Duration::from_millis(ms));
        }

        let mean = match avg.average() {
            Some(v) => v,
            None => panic!("expected an average"),
        };
        let diff = mean.as_secs_f64() - 0.025;
        assert!(diff.abs() < 1e-6, "mean={mean:?}");
    }

    #[test]
    fn rows_are_sorted_by_key() {
        let c = StatisticsCollector::new(StatsLevel::Full);
        c.get_or_add_request_stats("Zeta", "/");
        c.get_or_add_request_stats("Alpha", "/doc");

        let rows = c.request_rows();
        let methods: Vec<_> = rows.iter().map(|r| r.key.method.as_str()).collect();
        assert_eq!(methods, vec!["Alpha", "Zeta"]);
        assert!(rows.iter().all(|r| r.avg.is_none() && r.success == 0));
    }

    #[test]
    fn level_parses_and_orders() {
        assert_eq!("full".parse::<StatsLevel>().ok(), Some(StatsLevel::Full));
        assert_eq!("ON".parse::<StatsLevel>().ok(), Some(StatsLevel::On));
        assert!("verbose".parse::<StatsLevel>().is_err());
        assert!(StatsLevel::Full.actions_enabled());
        assert!(!StatsLevel::On.requests_enabled());
        assert!(!StatsLevel::Off.actions_enabled());
    }
}
