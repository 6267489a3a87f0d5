use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("`concurrentUsers` must be a positive integer")]
    InvalidConcurrentUsers,

    #[error("`iterations` must be a positive integer or -1 (infinite)")]
    InvalidIterations,

    #[error("`timeBuffer.duration` must be set for mode `{0}`")]
    InvalidTimeBuffer(String),

    #[error("`reconnectSettings.backoff` must not be empty when reconnect is enabled")]
    InvalidBackoff,

    #[error("`{0}` login settings require at least one user")]
    InvalidLoginSettings(String),

    #[error("scenario is empty")]
    EmptyScenario,

    #[error("unknown action type `{0}`")]
    UnknownAction(String),

    #[error("invalid settings for action `{action}`: {message}")]
    InvalidActionSettings { action: String, message: String },

    #[error("invalid server url `{url}`: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connection lost")]
    ConnectionLost,

    #[error("request `{method}` timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("engine error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("cancelled")]
    Cancelled,

    #[error("reconnect failed after {attempts} attempt(s)")]
    ReconnectExhausted { attempts: usize },

    #[error("{0}")]
    Action(String),
}

impl Error {
    /// Whether the error means the session's connection is gone (as opposed to a failed request).
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost)
    }

    /// Errors raised while validating settings, before any session starts.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidConcurrentUsers
                | Self::InvalidIterations
                | Self::InvalidTimeBuffer(_)
                | Self::InvalidBackoff
                | Self::InvalidLoginSettings(_)
                | Self::EmptyScenario
                | Self::UnknownAction(_)
                | Self::InvalidActionSettings { .. }
                | Self::InvalidUrl { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}
