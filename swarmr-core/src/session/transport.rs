use async_trait::async_trait;

use crate::config::ConnectionSettings;
use crate::error::Result;
use crate::users::User;

/// Write half of a session connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, text: String) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Read half of a session connection. `None` means the peer went away.
#[async_trait]
pub trait FrameStream: Send {
    async fn next_frame(&mut self) -> Option<Result<String>>;
}

pub struct Transport {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

/// Opens one connection per session (and per reconnect attempt).
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, settings: &ConnectionSettings, user: &User) -> Result<Transport>;
}
