use std::time::Duration;

use serde::{Deserialize, Serialize};
use swarmr_metrics::{ActionRow, CountersSnapshot, ExecutionCounters, RequestRow};

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SummaryLevel {
    None,
    #[default]
    Simple,
    /// Adds the per-action table.
    Extended,
    /// Adds the per-endpoint table too.
    Full,
}

/// End-of-run report. Which parts are present depends on the level, not on the data: a table
/// that the level asks for is `Some` even when empty.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub level: SummaryLevel,
    pub elapsed: Duration,
    pub totals: Option<CountersSnapshot>,
    pub actions: Option<Vec<ActionRow>>,
    pub requests: Option<Vec<RequestRow>>,
}

impl RunSummary {
    pub fn build(counters: &ExecutionCounters, level: SummaryLevel, elapsed: Duration) -> Self {
        let stats = counters.statistics();
        let action_rows = || stats.map(|s| s.action_rows()).unwrap_or_default();
        let request_rows = || stats.map(|s| s.request_rows()).unwrap_or_default();

        Self {
            level,
            elapsed,
            totals: (level >= SummaryLevel::Simple).then(|| counters.snapshot()),
            actions: (level >= SummaryLevel::Extended).then(action_rows),
            requests: (level >= SummaryLevel::Full).then(request_rows),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_none() && self.actions.is_none() && self.requests.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmr_metrics::StatsLevel;

    fn counters_with_samples() -> ExecutionCounters {
        let counters = ExecutionCounters::with_statistics(StatsLevel::Full);
        counters.actions.add(2);
        if let Some(stats) = counters.statistics() {
            stats
                .get_or_add_action_stats("openapp", "", "sales")
                .record(true, Duration::from_millis(20), 10, 20);
            stats
                .get_or_add_request_stats("OpenDoc", "/app")
                .record(true, Duration::from_millis(15), 10, 20);
        }
        counters
    }

    #[test]
    fn none_has_no_rows() {
        let summary = RunSummary::build(&counters_with_samples(), SummaryLevel::None, Duration::ZERO);
        assert!(summary.is_empty());
    }

    #[test]
    fn simple_has_only_totals() {
        let summary =
            RunSummary::build(&counters_with_samples(), SummaryLevel::Simple, Duration::ZERO);
        assert_eq!(summary.totals.map(|t| t.actions), Some(2));
        assert!(summary.actions.is_none());
        assert!(summary.requests.is_none());
    }

    #[test]
    fn extended_adds_actions() {
        let summary =
            RunSummary::build(&counters_with_samples(), SummaryLevel::Extended, Duration::ZERO);
        assert_eq!(summary.actions.map(|rows| rows.len()), Some(1));
        assert!(summary.requests.is_none());
    }

    #[test]
    fn full_has_both_tables_even_when_empty() {
        let summary = RunSummary::build(&ExecutionCounters::new(), SummaryLevel::Full, Duration::ZERO);
        assert_eq!(summary.actions, Some(Vec::new()));
        assert_eq!(summary.requests, Some(Vec::new()));

        let summary = RunSummary::build(&counters_with_samples(), SummaryLevel::Full, Duration::ZERO);
        assert_eq!(summary.requests.map(|rows| rows.len()), Some(1));
    }

    #[test]
    fn level_parses_case_insensitively() {
        assert_eq!("FULL".parse::<SummaryLevel>().ok(), Some(SummaryLevel::Full));
        assert_eq!("none".parse::<SummaryLevel>().ok(), Some(SummaryLevel::None));
    }
}
