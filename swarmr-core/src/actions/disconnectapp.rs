use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::config::ConnectionSettings;
use crate::error::Result;
use crate::session::{ActionState, SessionRuntime};

/// Leaves the current app: every event is unsubscribed and the app context is cleared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DisconnectApp {}

#[async_trait]
impl Action for DisconnectApp {
    async fn execute(
        &self,
        _rt: &SessionRuntime,
        _state: &Arc<ActionState>,
        _connection: &ConnectionSettings,
        _label: &str,
        reset: &(dyn Fn() + Send + Sync),
    ) -> Result<()> {
        reset();
        Ok(())
    }
}
