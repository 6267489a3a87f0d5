use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use swarmr_core::{
    ActionRegistry, RunContext, RunSummary, ScenarioAction, Scheduler, UserGenerator,
    validate_run,
};
use swarmr_metrics::ExecutionCounters;

use crate::cli::{ExecuteArgs, ValidateArgs};
use crate::exit_codes::ExitCode;
use crate::logging;
use crate::render;
use crate::run_config::RunConfig;
use crate::run_error::RunError;

/// Everything resolved from a config before the first connection.
struct Prepared {
    scheduler: Arc<dyn Scheduler>,
    scenario: Vec<ScenarioAction>,
    users: Arc<dyn UserGenerator>,
    warnings: Vec<String>,
}

fn prepare(cfg: &RunConfig) -> Result<Prepared, RunError> {
    let registry = ActionRegistry::with_builtins();
    let scenario = registry
        .build_scenario(&cfg.scenario)
        .map_err(|err| RunError::from_core(err, "invalid scenario"))?;
    let users = cfg
        .login_settings
        .clone()
        .into_generator()
        .map_err(|err| RunError::from_core(err, "invalid login settings"))?;
    cfg.connection_settings
        .url()
        .map_err(|err| RunError::from_core(err, "invalid connection settings"))?;

    let scheduler = cfg.scheduler.clone().into_scheduler();
    let warnings = validate_run(scheduler.as_ref(), &scenario)
        .map_err(|err| RunError::from_core(err, "invalid scheduler config"))?;

    Ok(Prepared {
        scheduler,
        scenario,
        users,
        warnings,
    })
}

pub async fn execute(args: ExecuteArgs) -> Result<ExitCode, RunError> {
    let mut cfg = RunConfig::load(&args.config)
        .await
        .map_err(RunError::InvalidInput)?;
    if let Some(summary) = args.summary {
        cfg.settings.summary = summary;
    }
    if let Some(statistics) = args.statistics {
        cfg.settings.statistics = statistics;
    }
    if args.traffic {
        cfg.settings.logs.traffic = true;
    }

    logging::init(
        &cfg.settings.logs.level,
        cfg.settings.logs.traffic,
        cfg.log_file().as_deref(),
    );

    let prepared = prepare(&cfg)?;
    for warning in &prepared.warnings {
        tracing::warn!("{warning}");
    }

    tokio::fs::create_dir_all(&cfg.settings.output_dir)
        .await
        .with_context(|| {
            format!(
                "failed to create output dir: {}",
                cfg.settings.output_dir.display()
            )
        })
        .map_err(RunError::RuntimeError)?;

    let counters = Arc::new(ExecutionCounters::with_statistics(cfg.settings.statistics));
    let mut ctx = RunContext::new(
        cfg.connection_settings.clone(),
        prepared.users,
        counters.clone(),
    );
    ctx.request_timeout = cfg.settings.timeout;
    ctx.output_dir = cfg.settings.output_dir.clone();
    ctx.traffic = cfg.settings.logs.traffic;
    ctx.status_interval = cfg.settings.status_interval;

    let cancel = ctx.cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; stopping virtual users");
            cancel.cancel();
        }
    });

    let started = Instant::now();
    let result = prepared
        .scheduler
        .execute(ctx, Arc::from(prepared.scenario))
        .await;
    interrupt.abort();
    result.map_err(|err| RunError::from_core(err, "run failed"))?;

    let summary = RunSummary::build(&counters, cfg.settings.summary, started.elapsed());
    print!("{}", render::render(&summary));

    Ok(ExitCode::from_errors(counters.errors.current()))
}

pub async fn validate(args: ValidateArgs) -> Result<ExitCode, RunError> {
    let cfg = RunConfig::load(&args.config)
        .await
        .map_err(RunError::InvalidInput)?;
    let prepared = prepare(&cfg)?;

    for warning in &prepared.warnings {
        println!("warning: {warning}");
    }
    println!(
        "config ok: {} user(s), {} action(s)",
        cfg.scheduler.settings.users(),
        prepared.scenario.len()
    );
    Ok(ExitCode::Success)
}
