use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use swarmr_metrics::ExecutionCounters;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::action::{ScenarioAction, validate_scenario};
use crate::config::{ConnectionSettings, SchedulerConfig, SchedulerKind};
use crate::error::{Error, Result};
use crate::session::{Connector, WsConnector};
use crate::status::{StatusFn, log_status, spawn_reporter};
use crate::users::UserGenerator;
use crate::vu::{self, VuShared};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Collaborators and run-wide knobs handed to a scheduler.
#[derive(Clone)]
pub struct RunContext {
    pub cancel: CancellationToken,
    pub request_timeout: Duration,
    pub output_dir: PathBuf,
    pub users: Arc<dyn UserGenerator>,
    pub connection: ConnectionSettings,
    pub connector: Arc<dyn Connector>,
    pub counters: Arc<ExecutionCounters>,
    /// Log every frame on `swarmr::traffic`.
    pub traffic: bool,
    /// Called every `status_interval`; defaults to [`log_status`].
    pub status: Option<StatusFn>,
    pub status_interval: Option<Duration>,
}

impl RunContext {
    pub fn new(
        connection: ConnectionSettings,
        users: Arc<dyn UserGenerator>,
        counters: Arc<ExecutionCounters>,
    ) -> Self {
        Self {
            cancel: CancellationToken::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            output_dir: PathBuf::from("."),
            users,
            connection,
            connector: Arc::new(WsConnector),
            counters,
            traffic: false,
            status: None,
            status_interval: None,
        }
    }
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Variants that generate their own load may run without a scenario.
    fn requires_scenario(&self) -> bool {
        true
    }

    /// Checks settings only; returns warnings.
    fn validate(&self) -> Result<Vec<String>>;

    /// Runs the whole population to completion. Only configuration errors are returned;
    /// per-user failures end up in the counters and the log.
    async fn execute(&self, ctx: RunContext, scenario: Arc<[ScenarioAction]>) -> Result<()>;
}

impl SchedulerConfig {
    pub fn into_scheduler(self) -> Arc<dyn Scheduler> {
        match self.kind {
            SchedulerKind::Simple => Arc::new(SimpleScheduler::new(self)),
        }
    }
}

/// Checks the scheduler and the scenario together: everything that can be rejected before a
/// single session starts.
pub fn validate_run(scheduler: &dyn Scheduler, scenario: &[ScenarioAction]) -> Result<Vec<String>> {
    let mut warnings = scheduler.validate()?;
    if scheduler.requires_scenario() && scenario.is_empty() {
        return Err(Error::EmptyScenario);
    }
    warnings.extend(validate_scenario(scenario)?);
    Ok(warnings)
}

/// Fixed population, staggered by `rampupDelay`, each user iterating until its budget runs out.
#[derive(Debug, Clone)]
pub struct SimpleScheduler {
    config: SchedulerConfig,
}

impl SimpleScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

#[async_trait]
impl Scheduler for SimpleScheduler {
    fn validate(&self) -> Result<Vec<String>> {
        let warnings = self.config.settings.validate()?;
        self.config.time_buffer.validate()?;
        self.config.reconnect_settings.validate()?;
        Ok(warnings)
    }

    async fn execute(&self, ctx: RunContext, scenario: Arc<[ScenarioAction]>) -> Result<()> {
        for warning in validate_run(self, &scenario)? {
            tracing::warn!("{warning}");
        }
        ctx.connection.url()?;

        let settings = self.config.settings.clone();
        let users = settings.users();
        let rampup = settings.rampup_delay;
        let started = Instant::now();
        let deadline = settings.execution_time.map(|limit| started + limit);

        tracing::info!(
            users,
            iterations = settings.iterations,
            execution_time = ?settings.execution_time,
            rampup = ?rampup,
            reuse_users = settings.reuse_users,
            "scheduler starting"
        );

        let reporter = match ctx.status_interval {
            Some(every) if !every.is_zero() => Some(spawn_reporter(
                ctx.counters.clone(),
                every,
                ctx.status.clone().unwrap_or_else(log_status),
                ctx.cancel.clone(),
                started,
            )),
            _ => None,
        };

        let counters = ctx.counters.clone();
        let shared = Arc::new(VuShared {
            ctx,
            settings,
            time_buffer: self.config.time_buffer,
            reconnect: self.config.reconnect_settings.clone(),
            scenario,
            started,
            deadline,
        });

        let mut handles = Vec::with_capacity(usize::try_from(users).unwrap_or(0));
        for vu in 1..=users {
            let offset = rampup.saturating_mul(u32::try_from(vu - 1).unwrap_or(u32::MAX));
            let span = tracing::info_span!(
                "vu",
                vu,
                session = tracing::field::Empty,
                user = tracing::field::Empty
            );
            handles.push((vu, tokio::spawn(vu::run(shared.clone(), vu, offset).instrument(span))));
        }

        for (vu, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(vu, error = %err, "virtual user stopped"),
                Err(err) => {
                    counters.errors.inc();
                    tracing::error!(vu, error = %err, "virtual user task failed");
                }
            }
        }

        if let Some(reporter) = reporter {
            reporter.abort();
        }
        tracing::info!(elapsed = ?started.elapsed(), "scheduler finished");
        Ok(())
    }
}
