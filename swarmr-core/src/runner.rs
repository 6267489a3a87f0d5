use std::time::{Duration, Instant};

use crate::action::ScenarioAction;
use crate::error::Error;
use crate::reconnect::{ReconnectManager, Recovery};
use crate::session::{ActionState, SessionRuntime};

/// How one scripted action ended.
#[derive(Debug)]
pub enum ActionOutcome {
    Completed { failed: bool },
    /// Failed, and the action's semantics skip the rest of the iteration.
    AbortIteration,
    /// The virtual user cannot go on (e.g. reconnect exhausted).
    Fatal(Error),
    Cancelled,
}

/// Runs scripted actions one at a time against a session.
pub struct ActionRunner<'a> {
    rt: &'a SessionRuntime,
    reconnect: &'a ReconnectManager,
}

impl<'a> ActionRunner<'a> {
    pub fn new(rt: &'a SessionRuntime, reconnect: &'a ReconnectManager) -> Self {
        Self { rt, reconnect }
    }

    pub async fn run(&self, step: &ScenarioAction) -> ActionOutcome {
        let rt = self.rt;
        rt.counters().actions.inc();
        loop {
            if rt.is_cancelled() {
                return ActionOutcome::Cancelled;
            }

            let state = rt.begin_action(&step.kind, &step.label);
            let started = Instant::now();

            let reset = || rt.reset_app_context();
            let result = step
                .action
                .execute(rt, &state, rt.connection(), &step.label, &reset)
                .await;

            match result {
                Err(Error::Cancelled) => return ActionOutcome::Cancelled,
                Err(err) => state.fail_with(&err),
                Ok(()) => {}
            }

            if !state.connection_lost() {
                if step.action.is_fire_and_forget() {
                    rt.wait_critical(&state).await;
                } else {
                    rt.wait(&state).await;
                }
            }
            if rt.is_cancelled() {
                return ActionOutcome::Cancelled;
            }

            if state.connection_lost() || rt.is_connection_lost() {
                tracing::warn!(
                    target: "swarmr::action",
                    action = %step.kind,
                    label = %step.label,
                    "connection lost during action"
                );
                match self.reconnect.recover(rt, step, &state).await {
                    Recovery::Restart => continue,
                    Recovery::Satisfied => return ActionOutcome::Completed { failed: false },
                    Recovery::Failed(Error::Cancelled) => return ActionOutcome::Cancelled,
                    Recovery::Failed(err) => {
                        record_action(rt, step, &state, started.elapsed());
                        return ActionOutcome::Fatal(err);
                    }
                }
            }

            record_action(rt, step, &state, started.elapsed());

            let failed = state.failed();
            if failed && step.action.aborts_iteration_on_error() {
                return ActionOutcome::AbortIteration;
            }
            return ActionOutcome::Completed { failed };
        }
    }
}

fn record_action(rt: &SessionRuntime, step: &ScenarioAction, state: &ActionState, elapsed: Duration) {
    let failed = state.failed();
    let elapsed_ms = elapsed.as_millis() as u64;
    if failed {
        tracing::warn!(
            target: "swarmr::action",
            action = %step.kind,
            label = %step.label,
            errors = state.error_count(),
            elapsed_ms,
            "action failed"
        );
    } else {
        tracing::info!(
            target: "swarmr::action",
            action = %step.kind,
            label = %step.label,
            elapsed_ms,
            "action succeeded"
        );
    }

    if let Some(stats) = rt.counters().statistics()
        && stats.level().actions_enabled()
    {
        let target = rt.app().app_id.unwrap_or_default();
        stats
            .get_or_add_action_stats(&step.kind, &step.label, &target)
            .record(!failed, elapsed, state.sent(), state.received());
    }
}
