use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use swarmr_core::SummaryLevel;
use swarmr_metrics::StatsLevel;

#[derive(Debug, Parser)]
#[command(
    name = "swarmr",
    author,
    version,
    about = "Load generator for session-oriented analytics engines",
    long_about = "swarmr simulates concurrent virtual users, each holding one engine session and running a scripted scenario of actions.\n\nA run config (YAML or JSON) describes the server connection, how users log in, the scheduler and the scenario.",
    after_help = "Examples:\n  swarmr execute -c scenario.yaml\n  swarmr execute -c scenario.yaml --summary full --statistics full\n  swarmr validate -c scenario.yaml"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a scenario against the configured server
    Execute(ExecuteArgs),

    /// Check a run config without connecting; prints warnings
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct ExecuteArgs {
    /// Path to the run config (.yaml, .yml or .json)
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,

    /// Override `settings.summary` (none, simple, extended, full)
    #[arg(long)]
    pub summary: Option<SummaryLevel>,

    /// Override `settings.statistics` (off, on, full)
    #[arg(long)]
    pub statistics: Option<StatsLevel>,

    /// Log every frame sent and received
    #[arg(long)]
    pub traffic: bool,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Path to the run config (.yaml, .yml or .json)
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_execute_overrides() {
        let parsed = Cli::try_parse_from([
            "swarmr",
            "execute",
            "-c",
            "run.yaml",
            "--summary",
            "FULL",
            "--statistics",
            "on",
            "--traffic",
        ]);

        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        match cli.command {
            Command::Execute(args) => {
                assert_eq!(args.config, PathBuf::from("run.yaml"));
                assert_eq!(args.summary, Some(SummaryLevel::Full));
                assert_eq!(args.statistics, Some(StatsLevel::On));
                assert!(args.traffic);
            }
            Command::Validate(_) => panic!("expected execute command"),
        }
    }

    #[test]
    fn cli_parses_validate() {
        let cli = match Cli::try_parse_from(["swarmr", "validate", "--config", "run.json"]) {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };
        match cli.command {
            Command::Validate(args) => assert_eq!(args.config, PathBuf::from("run.json")),
            Command::Execute(_) => panic!("expected validate command"),
        }
    }

    #[test]
    fn cli_rejects_unknown_summary_level() {
        let parsed = Cli::try_parse_from(["swarmr", "execute", "-c", "x.yaml", "--summary", "loud"]);
        assert!(parsed.is_err());
    }
}
