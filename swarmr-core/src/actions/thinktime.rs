use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::config::{ConnectionSettings, duration};
use crate::error::{Error, Result};
use crate::session::{ActionState, SessionRuntime};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkTimeKind {
    #[default]
    Static,
    /// Uniformly distributed in `mean ± dev`.
    Uniform,
}

/// Pause that imitates a user reading the screen.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ThinkTime {
    #[serde(rename = "type", default)]
    pub kind: ThinkTimeKind,
    #[serde(default, with = "duration")]
    pub delay: Duration,
    #[serde(default, with = "duration")]
    pub mean: Duration,
    #[serde(default, with = "duration")]
    pub dev: Duration,
}

impl ThinkTime {
    pub fn draw<R: Rng>(&self, rng: &mut R) -> Duration {
        match self.kind {
            ThinkTimeKind::Static => self.delay,
            ThinkTimeKind::Uniform => {
                let lo = self.mean.saturating_sub(self.dev);
                let hi = self.mean.saturating_add(self.dev);
                if lo >= hi {
                    return lo;
                }
                Duration::from_secs_f64(rng.random_range(lo.as_secs_f64()..=hi.as_secs_f64()))
            }
        }
    }
}

#[async_trait]
impl Action for ThinkTime {
    fn validate(&self) -> Result<Vec<String>> {
        match self.kind {
            ThinkTimeKind::Static if self.delay.is_zero() => {
                Ok(vec!["static think time with zero delay".to_string()])
            }
            ThinkTimeKind::Uniform if self.dev > self.mean => Err(Error::InvalidActionSettings {
                action: "thinktime".to_string(),
                message: "`dev` must not exceed `mean`".to_string(),
            }),
            _ => Ok(Vec::new()),
        }
    }

    async fn execute(
        &self,
        rt: &SessionRuntime,
        _state: &Arc<ActionState>,
        _connection: &ConnectionSettings,
        _label: &str,
        _reset: &(dyn Fn() + Send + Sync),
    ) -> Result<()> {
        let delay = rt.with_rng(|rng| self.draw(rng));
        tracing::debug!(target: "swarmr::action", delay_ms = delay.as_millis() as u64, "thinking");
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = rt.cancelled() => Err(Error::Cancelled),
        }
    }

    fn is_think_time(&self) -> bool {
        true
    }
}
