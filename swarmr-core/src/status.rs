use std::sync::Arc;
use std::time::{Duration, Instant};

use swarmr_metrics::{CountersSnapshot, ExecutionCounters};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// 1-based.
    pub tick: u64,
    pub elapsed: Duration,
    pub counters: CountersSnapshot,
}

impl std::fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = &self.counters;
        write!(
            f,
            "[{}s] errors: {}, warnings: {}, active users: {}, total sessions: {}, actions: {}, requests: {}",
            self.elapsed.as_secs(),
            c.errors,
            c.warnings,
            c.active_users,
            c.sessions,
            c.actions,
            c.requests
        )
    }
}

pub type StatusFn = Arc<dyn Fn(StatusUpdate) + Send + Sync + 'static>;

/// Logs each update on `swarmr::status`.
pub fn log_status() -> StatusFn {
    Arc::new(|update: StatusUpdate| {
        tracing::info!(target: "swarmr::status", tick = update.tick, "{update}");
    })
}

pub(crate) fn spawn_reporter(
    counters: Arc<ExecutionCounters>,
    every: Duration,
    status: StatusFn,
    cancel: CancellationToken,
    started: Instant,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut tick: u64 = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            tick = tick.saturating_add(1);
            status(StatusUpdate {
                tick,
                elapsed: started.elapsed(),
                counters: counters.snapshot(),
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test(start_paused = true)]
    async fn reporter_ticks_until_cancelled() {
        let counters = Arc::new(ExecutionCounters::new());
        counters.requests.add(3);
        let seen: Arc<Mutex<Vec<StatusUpdate>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            Arc::new(move |u: StatusUpdate| seen.lock().push(u)) as StatusFn
        };

        let cancel = CancellationToken::new();
        let handle = spawn_reporter(
            counters,
            Duration::from_secs(10),
            sink,
            cancel.clone(),
            Instant::now(),
        );

        tokio::time::sleep(Duration::from_secs(35)).await;
        cancel.cancel();
        handle
            .await
            .unwrap_or_else(|err| panic!("reporter panicked: {err}"));

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2].tick, 3);
        assert_eq!(seen[0].counters.requests, 3);
    }

    #[test]
    fn status_line_lists_counters() {
        let update = StatusUpdate {
            tick: 1,
            elapsed: Duration::from_secs(20),
            counters: CountersSnapshot {
                errors: 1,
                active_users: 4,
                ..CountersSnapshot::default()
            },
        };
        let line = update.to_string();
        assert!(line.starts_with("[20s] errors: 1"));
        assert!(line.contains("active users: 4"));
    }
}
