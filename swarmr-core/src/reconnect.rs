use std::time::Instant;

use parking_lot::Mutex;

use crate::action::ScenarioAction;
use crate::config::ReconnectSettings;
use crate::error::Error;
use crate::session::{ActionState, SessionRuntime};

/// Connection state of one virtual user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    Connected,
    Reconnecting { attempt: usize },
    Failed,
}

/// What the interrupted action should do next.
#[derive(Debug)]
pub enum Recovery {
    /// Run the action again from the top.
    Restart,
    /// Treat the action as done (think time).
    Satisfied,
    Failed(Error),
}

/// Walks the backoff schedule after an unexpected disconnect.
#[derive(Debug)]
pub struct ReconnectManager {
    settings: ReconnectSettings,
    state: Mutex<ReconnectState>,
}

impl ReconnectManager {
    pub fn new(settings: ReconnectSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(ReconnectState::Connected),
        }
    }

    pub fn state(&self) -> ReconnectState {
        *self.state.lock()
    }

    fn set(&self, next: ReconnectState) {
        let mut state = self.state.lock();
        tracing::debug!(from = ?*state, to = ?next, "reconnect state");
        *state = next;
    }

    /// Reconnects `rt` after `interrupted` lost its connection.
    pub async fn recover(
        &self,
        rt: &SessionRuntime,
        interrupted: &ScenarioAction,
        state: &ActionState,
    ) -> Recovery {
        if !self.settings.reconnect {
            self.set(ReconnectState::Failed);
            state.add_error(Error::ConnectionLost.to_string());
            return Recovery::Failed(Error::ConnectionLost);
        }

        let started = Instant::now();
        for (idx, wait) in self.settings.backoff.iter().enumerate() {
            let attempt = idx + 1;
            self.set(ReconnectState::Reconnecting { attempt });

            if !wait.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(*wait) => {}
                    _ = rt.cancelled() => {
                        self.set(ReconnectState::Failed);
                        return Recovery::Failed(Error::Cancelled);
                    }
                }
            }

            match rt.reconnect().await {
                Ok(()) => {
                    self.set(ReconnectState::Connected);
                    tracing::info!(attempt, "reconnected");
                    self.record_success(rt, interrupted, started.elapsed());
                    return resume_after_reconnect(interrupted);
                }
                Err(Error::Cancelled) => {
                    self.set(ReconnectState::Failed);
                    return Recovery::Failed(Error::Cancelled);
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "reconnect attempt failed");
                }
            }
        }

        self.set(ReconnectState::Failed);
        let err = Error::ReconnectExhausted {
            attempts: self.settings.backoff.len(),
        };
        state.add_error(err.to_string());
        Recovery::Failed(err)
    }

    /// The reconnect is reported as a successful action of its own.
    fn record_success(
        &self,
        rt: &SessionRuntime,
        interrupted: &ScenarioAction,
        elapsed: std::time::Duration,
    ) {
        let name = format!("Reconnect({})", interrupted.kind);
        rt.counters().actions.inc();
        tracing::info!(
            target: "swarmr::action",
            action = %format!("Reconnect({}/{})", interrupted.kind, interrupted.label),
            elapsed_ms = elapsed.as_millis() as u64,
            "action succeeded"
        );

        if let Some(stats) = rt.counters().statistics()
            && stats.level().actions_enabled()
        {
            let target = rt.app().app_id.unwrap_or_default();
            stats
                .get_or_add_action_stats(&name, &interrupted.label, &target)
                .record(true, elapsed, 0, 0);
        }
    }
}

/// Interrupted actions restart; think time counts as already spent.
pub fn resume_after_reconnect(interrupted: &ScenarioAction) -> Recovery {
    if interrupted.action.is_think_time() {
        Recovery::Satisfied
    } else {
        Recovery::Restart
    }
}
