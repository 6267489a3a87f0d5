use std::sync::Arc;
use std::time::{Duration, Instant};

use swarmr_metrics::{ActiveGuard, Gauge};
use tokio_util::sync::CancellationToken;

use crate::action::ScenarioAction;
use crate::config::{ReconnectSettings, SchedulerSettings};
use crate::error::{Error, Result};
use crate::gate::IterationGate;
use crate::random::session_seed;
use crate::reconnect::ReconnectManager;
use crate::runner::{ActionOutcome, ActionRunner};
use crate::scheduler::RunContext;
use crate::session::{SessionParams, SessionRuntime};
use crate::timebuffer::{IterationOutcome, TimeBuffer};

/// Read-only state shared by every virtual user of one run.
pub(crate) struct VuShared {
    pub ctx: RunContext,
    pub settings: SchedulerSettings,
    pub time_buffer: TimeBuffer,
    pub reconnect: ReconnectSettings,
    pub scenario: Arc<[ScenarioAction]>,
    pub started: Instant,
    pub deadline: Option<Instant>,
}

struct LiveSession {
    rt: SessionRuntime,
    _active: ActiveGuard,
}

enum IterationEnd {
    Done,
    Cancelled,
    Fatal(Error),
}

/// One virtual user: waits for its ramp-up slot, then iterates the scenario until the gate,
/// the deadline or cancellation stops it. Returns the error that ended it early, if any.
pub(crate) async fn run(shared: Arc<VuShared>, vu: u64, offset: Duration) -> Result<()> {
    let cancel = &shared.ctx.cancel;
    if !wait_for_start(shared.started + offset, cancel, shared.deadline).await {
        tracing::debug!("run ended before this user started");
        return Ok(());
    }

    let _thread = shared.ctx.counters.enter(Gauge::Threads);
    let gate = IterationGate::new(shared.settings.iteration_limit(), shared.deadline);
    let reconnect = ReconnectManager::new(shared.reconnect.clone());

    let mut live: Option<LiveSession> = None;
    let mut result = Ok(());

    while !cancel.is_cancelled() && gate.next() {
        let session = match live.take() {
            Some(session) => session,
            None => match start_session(&shared, vu).await {
                Ok(session) => session,
                Err(err) => {
                    result = Err(err);
                    break;
                }
            },
        };

        let iteration_started = Instant::now();
        let (errors, end) = run_iteration(&session.rt, &reconnect, &shared.scenario).await;
        tracing::debug!(iteration = gate.started(), errors, "iteration finished");

        match end {
            IterationEnd::Done => {}
            IterationEnd::Cancelled => {
                live = Some(session);
                break;
            }
            IterationEnd::Fatal(err) => {
                session.rt.close().await;
                result = Err(err);
                break;
            }
        }

        if shared.settings.reuse_users {
            live = Some(session);
        } else {
            session.rt.close().await;
        }

        let delay = shared.time_buffer.delay(IterationOutcome {
            errors,
            elapsed: iteration_started.elapsed(),
        });
        if !delay.is_zero() && !pause(delay, cancel, shared.deadline).await {
            break;
        }
    }

    if let Some(session) = live {
        session.rt.close().await;
    }
    result
}

async fn start_session(shared: &VuShared, vu: u64) -> Result<LiveSession> {
    let ctx = &shared.ctx;
    let draw = ctx.counters.users.inc();
    let user = ctx.users.iterate(draw);

    let span = tracing::Span::current();
    span.record("session", draw);
    span.record("user", user.qualified_name().as_str());

    let params = SessionParams {
        vu,
        session: draw,
        user,
        connection: ctx.connection.clone(),
        connector: ctx.connector.clone(),
        counters: ctx.counters.clone(),
        request_timeout: ctx.request_timeout,
        cancel: ctx.cancel.clone(),
        output_dir: ctx.output_dir.clone(),
        traffic: ctx.traffic,
        seed: session_seed(
            shared.settings.instance_number,
            draw,
            shared.settings.only_instance_seed,
        ),
    };

    match SessionRuntime::connect(params).await {
        Ok(rt) => {
            ctx.counters.sessions.inc();
            Ok(LiveSession {
                rt,
                _active: ctx.counters.enter(Gauge::ActiveUsers),
            })
        }
        Err(err) => {
            ctx.counters.errors.inc();
            tracing::error!(error = %err, "session start failed");
            Err(err)
        }
    }
}

/// Returns the number of failed actions and how the iteration ended.
async fn run_iteration(
    rt: &SessionRuntime,
    reconnect: &ReconnectManager,
    scenario: &[ScenarioAction],
) -> (u64, IterationEnd) {
    let runner = ActionRunner::new(rt, reconnect);
    let mut errors = 0;

    for step in scenario {
        match runner.run(step).await {
            ActionOutcome::Completed { failed } => {
                if failed {
                    errors += 1;
                }
            }
            ActionOutcome::AbortIteration => {
                tracing::info!(action = %step.kind, label = %step.label, "iteration aborted");
                return (errors + 1, IterationEnd::Done);
            }
            ActionOutcome::Fatal(err) => return (errors + 1, IterationEnd::Fatal(err)),
            ActionOutcome::Cancelled => return (errors, IterationEnd::Cancelled),
        }
    }
    (errors, IterationEnd::Done)
}

/// Sleeps until the user's ramp-up slot. `false` if the run ends first; a slot at or past the
/// deadline never starts.
async fn wait_for_start(at: Instant, cancel: &CancellationToken, deadline: Option<Instant>) -> bool {
    if deadline.is_some_and(|deadline| deadline <= at) {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep_until(at.into()) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Time-buffer pause between iterations. `false` if cancelled or the deadline passed meanwhile.
async fn pause(delay: Duration, cancel: &CancellationToken, deadline: Option<Instant>) -> bool {
    let deadline_hit = async {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
        _ = deadline_hit => false,
    }
}
