pub mod counters;
pub mod stats;

pub use counters::{ActiveGuard, Counter, CountersSnapshot, ExecutionCounters, Gauge};
pub use stats::{
    ActionKey, ActionRow, ActionStats, RequestKey, RequestRow, RequestStats, RespAvg, SampleStats,
    StatisticsCollector, StatsLevel,
};
