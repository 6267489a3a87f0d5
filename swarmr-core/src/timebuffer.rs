use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration;
use crate::error::{Error, Result};

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TimeBufferMode {
    #[default]
    NoWait,
    Constant,
    OnError,
    MinDuration,
}

/// Pacing applied once between two iterations of the same virtual user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeBuffer {
    #[serde(default)]
    pub mode: TimeBufferMode,

    #[serde(default, with = "duration")]
    pub duration: Duration,
}

/// What the time buffer needs to know about the iteration that just ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationOutcome {
    pub errors: u64,
    pub elapsed: Duration,
}

impl TimeBuffer {
    pub fn new(mode: TimeBufferMode, duration: Duration) -> Self {
        Self { mode, duration }
    }

    pub fn validate(&self) -> Result<()> {
        if self.mode != TimeBufferMode::NoWait && self.duration.is_zero() {
            return Err(Error::InvalidTimeBuffer(self.mode.to_string()));
        }
        Ok(())
    }

    pub fn delay(&self, outcome: IterationOutcome) -> Duration {
        match self.mode {
            TimeBufferMode::NoWait => Duration::ZERO,
            TimeBufferMode::Constant => self.duration,
            TimeBufferMode::OnError if outcome.errors > 0 => self.duration,
            TimeBufferMode::OnError => Duration::ZERO,
            TimeBufferMode::MinDuration => self.duration.saturating_sub(outcome.elapsed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(errors: u64, elapsed_ms: u64) -> IterationOutcome {
        IterationOutcome {
            errors,
            elapsed: Duration::from_millis(elapsed_ms),
        }
    }

    #[test]
    fn no_wait_and_constant_ignore_outcome() {
        let t = Duration::from_secs(3);
        assert_eq!(
            TimeBuffer::new(TimeBufferMode::NoWait, t).delay(outcome(5, 10)),
            Duration::ZERO
        );
        for o in [outcome(0, 0), outcome(2, 10_000)] {
            assert_eq!(TimeBuffer::new(TimeBufferMode::Constant, t).delay(o), t);
        }
    }

    #[test]
    fn on_error_waits_only_after_failures() {
        let tb = TimeBuffer::new(TimeBufferMode::OnError, Duration::from_secs(2));
        assert_eq!(tb.delay(outcome(0, 50)), Duration::ZERO);
        assert_eq!(tb.delay(outcome(1, 50)), Duration::from_secs(2));
        assert_eq!(tb.delay(outcome(7, 50)), Duration::from_secs(2));
    }

    #[test]
    fn min_duration_pads_short_iterations() {
        let tb = TimeBuffer::new(TimeBufferMode::MinDuration, Duration::from_millis(1000));
        assert_eq!(tb.delay(outcome(0, 300)), Duration::from_millis(700));
        assert_eq!(tb.delay(outcome(0, 1000)), Duration::ZERO);
        assert_eq!(tb.delay(outcome(3, 4000)), Duration::ZERO);
    }

    #[test]
    fn modes_other_than_nowait_need_a_duration() {
        assert!(TimeBuffer::default().validate().is_ok());
        assert!(matches!(
            TimeBuffer::new(TimeBufferMode::OnError, Duration::ZERO).validate(),
            Err(Error::InvalidTimeBuffer(mode)) if mode == "onerror"
        ));
    }

    #[test]
    fn parses_lowercase_modes() {
        let tb: TimeBuffer = serde_yaml::from_str("mode: minduration\nduration: 5s\n")
            .unwrap_or_else(|err| panic!("parse failed: {err}"));
        assert_eq!(tb.mode, TimeBufferMode::MinDuration);
        assert_eq!(tb.duration, Duration::from_secs(5));
    }
}
