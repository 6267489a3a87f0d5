use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use swarmr_metrics::ExecutionCounters;
use tokio::sync::watch;

use crate::error::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Pending {
    all: usize,
    /// Requests whose failure fails the action (sync calls and `fail_on_error` queued ones).
    critical: usize,
}

/// Errors, warnings and outstanding work of one action invocation.
#[derive(Debug)]
pub struct ActionState {
    action: String,
    label: String,
    errors: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
    sent: AtomicU64,
    received: AtomicU64,
    pending: watch::Sender<Pending>,
    connection_lost: AtomicBool,
    counters: Arc<ExecutionCounters>,
}

impl ActionState {
    pub fn new(
        action: impl Into<String>,
        label: impl Into<String>,
        counters: Arc<ExecutionCounters>,
    ) -> Arc<Self> {
        Arc::new(Self {
            action: action.into(),
            label: label.into(),
            errors: Mutex::new(Vec::new()),
            warnings: Mutex::new(Vec::new()),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            pending: watch::Sender::new(Pending::default()),
            connection_lost: AtomicBool::new(false),
            counters,
        })
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn add_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.counters.errors.inc();
        tracing::error!(
            target: "swarmr::action",
            action = %self.action,
            label = %self.label,
            error = %message,
            "action error"
        );
        self.errors.lock().push(message);
    }

    pub fn add_warning(&self, message: impl Into<String>) {
        let message = message.into();
        self.counters.warnings.inc();
        tracing::warn!(
            target: "swarmr::action",
            action = %self.action,
            label = %self.label,
            warning = %message,
            "action warning"
        );
        self.warnings.lock().push(message);
    }

    /// Records `err` the way the runner would: connection loss marks the state, the rest fail it.
    pub fn fail_with(&self, err: &Error) {
        match err {
            Error::ConnectionLost => self.mark_connection_lost(),
            Error::Cancelled => {}
            other => self.add_error(other.to_string()),
        }
    }

    pub fn failed(&self) -> bool {
        !self.errors.lock().is_empty()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().clone()
    }

    pub fn error_count(&self) -> u64 {
        self.errors.lock().len() as u64
    }

    pub fn mark_connection_lost(&self) {
        self.connection_lost.store(true, Ordering::Release);
    }

    pub fn connection_lost(&self) -> bool {
        self.connection_lost.load(Ordering::Acquire)
    }

    pub(crate) fn add_traffic(&self, sent: u64, received: u64) {
        self.sent.fetch_add(sent, Ordering::Relaxed);
        self.received.fetch_add(received, Ordering::Relaxed);
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Registers one unit of outstanding work until the guard drops.
    pub(crate) fn begin(self: &Arc<Self>, critical: bool) -> PendingGuard {
        self.pending.send_modify(|p| {
            p.all += 1;
            if critical {
                p.critical += 1;
            }
        });
        PendingGuard {
            state: self.clone(),
            critical,
        }
    }

    pub fn outstanding(&self) -> usize {
        self.pending.borrow().all
    }

    /// Resolves once nothing queued for this action is still running.
    pub async fn wait_idle(&self) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|p| p.all == 0).await;
    }

    /// Resolves once no request that can fail the action is still running.
    pub async fn wait_critical(&self) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|p| p.critical == 0).await;
    }
}

pub(crate) struct PendingGuard {
    state: Arc<ActionState>,
    critical: bool,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let critical = self.critical;
        self.state.pending.send_modify(|p| {
            p.all = p.all.saturating_sub(1);
            if critical {
                p.critical = p.critical.saturating_sub(1);
            }
        });
    }
}
