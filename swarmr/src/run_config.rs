use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Deserializer};
use swarmr_core::config::duration;
use swarmr_core::{ConnectionSettings, LoginSettings, ScenarioStep, SchedulerConfig, SummaryLevel};
use swarmr_metrics::StatsLevel;

/// A whole run config document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub connection_settings: ConnectionSettings,

    #[serde(default)]
    pub login_settings: LoginSettings,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub scenario: Vec<ScenarioStep>,

    #[serde(default)]
    pub settings: RunSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSettings {
    /// Per-request timeout.
    #[serde(default = "default_timeout", with = "duration")]
    pub timeout: Duration,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default)]
    pub logs: LogSettings,

    #[serde(default, deserialize_with = "from_str")]
    pub statistics: StatsLevel,

    #[serde(default)]
    pub summary: SummaryLevel,

    /// `0` disables the periodic status line.
    #[serde(default = "default_status_interval", with = "duration::infinite")]
    pub status_interval: Option<Duration>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            output_dir: default_output_dir(),
            logs: LogSettings::default(),
            statistics: StatsLevel::default(),
            summary: SummaryLevel::default(),
            status_interval: default_status_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub traffic: bool,

    /// Relative paths resolve against `outputDir`.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            traffic: false,
            file: None,
        }
    }
}

fn default_timeout() -> Duration {
    swarmr_core::scheduler::DEFAULT_REQUEST_TIMEOUT
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_status_interval() -> Option<Duration> {
    Some(Duration::from_secs(10))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn from_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

impl RunConfig {
    /// YAML is a superset of JSON, so one parser covers both file kinds.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(text).context("failed to parse run config")
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read run config: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid run config: {}", path.display()))
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        let file = self.settings.logs.file.as_ref()?;
        Some(if file.is_absolute() {
            file.clone()
        } else {
            self.settings.output_dir.join(file)
        })
    }
}
