pub mod duration;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::timebuffer::TimeBuffer;

pub const DEFAULT_USER_HEADER: &str = "X-Swarmr-User";

/// Declarative scheduling knobs for the `simple` scheduler.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SchedulerSettings {
    pub concurrent_users: i64,

    /// Iterations per virtual user; `-1` means no limit.
    #[serde(default = "default_iterations")]
    pub iterations: i64,

    /// Wall-clock budget for the whole run; `None` (written `-1`) means no limit.
    #[serde(default, with = "duration::infinite")]
    pub execution_time: Option<Duration>,

    #[serde(default, with = "duration")]
    pub rampup_delay: Duration,

    #[serde(default)]
    pub reuse_users: bool,

    #[serde(default)]
    pub only_instance_seed: bool,

    #[serde(default)]
    pub instance_number: u64,
}

fn default_iterations() -> i64 {
    1
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            concurrent_users: 1,
            iterations: default_iterations(),
            execution_time: None,
            rampup_delay: Duration::ZERO,
            reuse_users: false,
            only_instance_seed: false,
            instance_number: 0,
        }
    }
}

impl SchedulerSettings {
    pub fn validate(&self) -> Result<Vec<String>> {
        if self.concurrent_users < 1 {
            return Err(Error::InvalidConcurrentUsers);
        }
        if self.iterations == 0 || self.iterations < -1 {
            return Err(Error::InvalidIterations);
        }

        let mut warnings = Vec::new();
        if self.iteration_limit().is_none() && self.execution_time.is_none() {
            warnings.push(
                "both `iterations` and `executionTime` are infinite; the run stops only when cancelled"
                    .to_string(),
            );
        }
        if let Some(limit) = self.execution_time {
            let last_start = self
                .rampup_delay
                .saturating_mul(u32::try_from(self.concurrent_users - 1).unwrap_or(u32::MAX));
            if last_start >= limit {
                warnings.push(format!(
                    "ramp-up of the last user ({last_start:?}) does not fit in `executionTime` ({limit:?})"
                ));
            }
        }
        Ok(warnings)
    }

    /// `None` when iterations are unlimited.
    pub fn iteration_limit(&self) -> Option<u64> {
        u64::try_from(self.iterations).ok()
    }

    pub fn users(&self) -> u64 {
        u64::try_from(self.concurrent_users).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectSettings {
    #[serde(default)]
    pub reconnect: bool,

    /// Wait before each attempt; the first entry is usually zero.
    #[serde(default = "default_backoff", with = "duration::seq")]
    pub backoff: Vec<Duration>,
}

fn default_backoff() -> Vec<Duration> {
    let mut backoff = vec![Duration::ZERO];
    backoff.extend(std::iter::repeat_n(Duration::from_secs(2), 5));
    backoff
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            reconnect: false,
            backoff: default_backoff(),
        }
    }
}

impl ReconnectSettings {
    pub fn validate(&self) -> Result<()> {
        if self.reconnect && self.backoff.is_empty() {
            return Err(Error::InvalidBackoff);
        }
        Ok(())
    }
}

/// How to reach the engine. Passed unchanged to every action and to the reconnect path.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSettings {
    pub server: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Header carrying `directory\username` on connect.
    #[serde(default = "default_user_header")]
    pub user_header: String,

    #[serde(default = "default_connect_timeout", with = "duration")]
    pub connect_timeout: Duration,
}

fn default_user_header() -> String {
    DEFAULT_USER_HEADER.to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

impl ConnectionSettings {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            headers: BTreeMap::new(),
            user_header: default_user_header(),
            connect_timeout: default_connect_timeout(),
        }
    }

    pub fn url(&self) -> Result<Url> {
        let url = Url::parse(&self.server).map_err(|err| Error::InvalidUrl {
            url: self.server.clone(),
            message: err.to_string(),
        })?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(Error::InvalidUrl {
                url: self.server.clone(),
                message: format!("unsupported scheme `{other}` (expected ws or wss)"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SchedulerKind {
    #[default]
    Simple,
}

/// The `scheduler` section of a run config.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    #[serde(rename = "type", default)]
    pub kind: SchedulerKind,

    #[serde(default)]
    pub settings: SchedulerSettings,

    #[serde(default)]
    pub time_buffer: TimeBuffer,

    #[serde(default)]
    pub reconnect_settings: ReconnectSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse<T: serde::de::DeserializeOwned>(yaml: &str) -> T {
        serde_yaml::from_str(yaml).unwrap_or_else(|err| panic!("parse failed: {err}"))
    }

    #[test]
    fn scheduler_settings_accept_humantime_and_seconds() {
        let s: SchedulerSettings = parse(
            "concurrentUsers: 4\niterations: -1\nexecutionTime: 90\nrampupDelay: 250ms\n",
        );
        assert_eq!(s.users(), 4);
        assert_eq!(s.iteration_limit(), None);
        assert_eq!(s.execution_time, Some(Duration::from_secs(90)));
        assert_eq!(s.rampup_delay, Duration::from_millis(250));

        let s: SchedulerSettings = parse("concurrentUsers: 1\nrampupDelay: 1.5\n");
        assert_eq!(s.rampup_delay, Duration::from_millis(1500));
        assert_eq!(s.iteration_limit(), Some(1));
    }

    #[test]
    fn execution_time_minus_one_and_zero_mean_infinite() {
        for raw in ["-1", "0", "\"-1\"", "-5"] {
            let s: SchedulerSettings = parse(&format!("concurrentUsers: 1\nexecutionTime: {raw}\n"));
            assert_eq!(s.execution_time, None, "executionTime: {raw}");
        }
    }

    #[test]
    fn validation_rejects_bad_users_and_iterations() {
        let mut s = SchedulerSettings {
            concurrent_users: 0,
            ..SchedulerSettings::default()
        };
        assert!(matches!(s.validate(), Err(Error::InvalidConcurrentUsers)));

        s.concurrent_users = 2;
        for bad in [0, -2] {
            s.iterations = bad;
            assert!(matches!(s.validate(), Err(Error::InvalidIterations)));
        }

        s.iterations = -1;
        match s.validate() {
            Ok(warnings) => assert_eq!(warnings.len(), 1),
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    #[test]
    fn reconnect_defaults_to_immediate_then_two_seconds() {
        let r: ReconnectSettings = parse("reconnect: true\n");
        assert_eq!(r.backoff.len(), 6);
        assert_eq!(r.backoff[0], Duration::ZERO);
        assert!(r.backoff[1..].iter().all(|d| *d == Duration::from_secs(2)));

        let r: ReconnectSettings = parse("reconnect: true\nbackoff: [0, 1s, 500ms]\n");
        assert_eq!(
            r.backoff,
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_millis(500)
            ]
        );

        let r = ReconnectSettings {
            reconnect: true,
            backoff: Vec::new(),
        };
        assert!(matches!(r.validate(), Err(Error::InvalidBackoff)));
    }

    #[test]
    fn connection_url_requires_websocket_scheme() {
        assert!(ConnectionSettings::new("ws://127.0.0.1:1/app").url().is_ok());
        assert!(matches!(
            ConnectionSettings::new("http://127.0.0.1/app").url(),
            Err(Error::InvalidUrl { .. })
        ));
        assert!(matches!(
            ConnectionSettings::new("not a url").url(),
            Err(Error::InvalidUrl { .. })
        ));
    }

    #[test]
    fn connection_settings_defaults() {
        let c: ConnectionSettings = parse("server: ws://localhost/app\n");
        assert_eq!(c.user_header, DEFAULT_USER_HEADER);
        assert_eq!(c.connect_timeout, Duration::from_secs(30));
        assert!(c.headers.is_empty());
    }
}
