#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use swarmr_core::users::Anonymous;
use swarmr_core::{
    ActionRegistry, ConnectionSettings, RunContext, ScenarioAction, ScenarioStep, Scheduler,
    SchedulerConfig,
};
use swarmr_metrics::{ExecutionCounters, StatsLevel};

pub fn scenario(steps: Value) -> Arc<[ScenarioAction]> {
    let steps: Vec<ScenarioStep> =
        serde_json::from_value(steps).unwrap_or_else(|err| panic!("bad scenario: {err}"));
    let actions = ActionRegistry::with_builtins()
        .build_scenario(&steps)
        .unwrap_or_else(|err| panic!("scenario did not build: {err}"));
    Arc::from(actions)
}

pub fn scheduler(yaml: &str) -> SchedulerConfig {
    serde_yaml::from_str(yaml).unwrap_or_else(|err| panic!("bad scheduler config: {err}"))
}

pub fn context(server: &str, level: StatsLevel) -> RunContext {
    let mut ctx = RunContext::new(
        ConnectionSettings::new(server),
        Arc::new(Anonymous),
        Arc::new(ExecutionCounters::with_statistics(level)),
    );
    ctx.request_timeout = Duration::from_secs(10);
    ctx
}

/// Runs `steps` under the scheduler described by `yaml` and returns the run's counters.
pub async fn run(
    server: &str,
    yaml: &str,
    steps: Value,
    level: StatsLevel,
) -> swarmr_core::Result<Arc<ExecutionCounters>> {
    let ctx = context(server, level);
    let counters = ctx.counters.clone();
    scheduler(yaml)
        .into_scheduler()
        .execute(ctx, scenario(steps))
        .await?;
    Ok(counters)
}

/// Polls `cond` until it holds or two seconds pass.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
