use std::fmt::Write as _;
use std::time::Duration;

use swarmr_core::RunSummary;
use swarmr_metrics::{ActionRow, RequestRow};

pub(crate) fn format_bytes(b: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * 1024 * 1024;

    if b >= GIB {
        return format!("{:.2}GiB", (b as f64) / (GIB as f64));
    }
    if b >= MIB {
        return format!("{:.2}MiB", (b as f64) / (MIB as f64));
    }
    if b >= KIB {
        return format!("{:.2}KiB", (b as f64) / (KIB as f64));
    }

    format!("{b}B")
}

pub(crate) fn format_avg(avg: Option<Duration>) -> String {
    match avg {
        Some(d) if d >= Duration::from_secs(1) => format!("{:.2}s", d.as_secs_f64()),
        Some(d) => format!("{:.2}ms", d.as_secs_f64() * 1000.0),
        None => "-".to_string(),
    }
}

fn label_or_dash(s: &str) -> &str {
    if s.is_empty() { "-" } else { s }
}

/// Plain-text summary; empty when the level is `none`.
pub(crate) fn render(summary: &RunSummary) -> String {
    let mut out = String::new();
    if summary.is_empty() {
        return out;
    }

    writeln!(
        &mut out,
        "summary ({}s elapsed)",
        summary.elapsed.as_secs_f64().round()
    )
    .ok();

    if let Some(t) = &summary.totals {
        writeln!(&mut out, "  errors: {}", t.errors).ok();
        writeln!(&mut out, "  warnings: {}", t.warnings).ok();
        writeln!(&mut out, "  actions: {}", t.actions).ok();
        writeln!(&mut out, "  requests: {}", t.requests).ok();
        writeln!(&mut out, "  sessions: {}", t.sessions).ok();
        writeln!(&mut out, "  users: {}", t.users).ok();
    }

    if let Some(rows) = &summary.actions {
        out.push('\n');
        render_actions(rows, &mut out);
    }
    if let Some(rows) = &summary.requests {
        out.push('\n');
        render_requests(rows, &mut out);
    }
    out
}

fn render_actions(rows: &[ActionRow], out: &mut String) {
    out.push_str("actions\n");
    if rows.is_empty() {
        out.push_str("  (no samples)\n");
        return;
    }
    for r in rows {
        writeln!(
            out,
            "  {} label={} target={} ok={} fail={} avg={} sent={} recv={}",
            r.key.action,
            label_or_dash(&r.key.label),
            label_or_dash(&r.key.target),
            r.success,
            r.fail,
            format_avg(r.avg),
            format_bytes(r.sent),
            format_bytes(r.received)
        )
        .ok();
    }
}

fn render_requests(rows: &[RequestRow], out: &mut String) {
    out.push_str("requests\n");
    if rows.is_empty() {
        out.push_str("  (no samples)\n");
        return;
    }
    for r in rows {
        writeln!(
            out,
            "  {} path={} ok={} fail={} avg={} sent={} recv={}",
            r.key.method,
            label_or_dash(&r.key.path),
            r.success,
            r.fail,
            format_avg(r.avg),
            format_bytes(r.sent),
            format_bytes(r.received)
        )
        .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmr_core::SummaryLevel;
    use swarmr_metrics::{ExecutionCounters, StatsLevel};

    #[test]
    fn none_renders_nothing() {
        let summary = RunSummary::build(&ExecutionCounters::new(), SummaryLevel::None, Duration::ZERO);
        assert_eq!(render(&summary), "");
    }

    #[test]
    fn full_renders_both_tables() {
        let counters = ExecutionCounters::with_statistics(StatsLevel::Full);
        counters.errors.inc();
        if let Some(stats) = counters.statistics() {
            stats
                .get_or_add_action_stats("openapp", "open", "sales")
                .record(true, Duration::from_millis(12), 100, 2048);
        }
        let summary = RunSummary::build(&counters, SummaryLevel::Full, Duration::from_secs(3));
        let text = render(&summary);

        assert!(text.starts_with("summary (3s elapsed)"));
        assert!(text.contains("  errors: 1\n"));
        assert!(text.contains("openapp label=open target=sales ok=1 fail=0 avg=12.00ms"));
        assert!(text.contains("recv=2.00KiB"));
        assert!(text.contains("requests\n  (no samples)\n"));
    }

    #[test]
    fn bytes_and_avg_formatting() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00MiB");
        assert_eq!(format_avg(None), "-");
        assert_eq!(format_avg(Some(Duration::from_millis(1500))), "1.50s");
    }
}
