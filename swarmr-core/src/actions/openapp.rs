use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::action::Action;
use crate::config::ConnectionSettings;
use crate::error::{Error, Result};
use crate::session::protocol::METHOD_OPEN_DOC;
use crate::session::{
    ActionState, AppContext, Handle, Request, SessionRuntime, event_fn, restore_fn,
};

/// Opens an app and makes it the session's current context.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OpenApp {
    pub app_id: String,
}

async fn open_doc(rt: &SessionRuntime, state: &Arc<ActionState>, app_id: &str) -> Result<Handle> {
    let reply = rt
        .send_request(
            state,
            Request::new(METHOD_OPEN_DOC).params(json!({ "appId": app_id })),
        )
        .await?;
    let handle = reply
        .get("handle")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::Protocol(format!("{METHOD_OPEN_DOC} reply has no handle")))?;

    rt.set_app(AppContext {
        app_id: Some(app_id.to_string()),
        handle: Some(handle),
    });
    Ok(handle)
}

#[async_trait]
impl Action for OpenApp {
    fn validate(&self) -> Result<Vec<String>> {
        if self.app_id.trim().is_empty() {
            return Err(Error::InvalidActionSettings {
                action: "openapp".to_string(),
                message: "`appId` must not be empty".to_string(),
            });
        }
        Ok(Vec::new())
    }

    async fn execute(
        &self,
        rt: &SessionRuntime,
        state: &Arc<ActionState>,
        _connection: &ConnectionSettings,
        _label: &str,
        reset: &(dyn Fn() + Send + Sync),
    ) -> Result<()> {
        reset();
        let handle = open_doc(rt, state, &self.app_id).await?;

        rt.register_event(
            handle,
            event_fn(|_, _| async { Ok(()) }),
            Some(event_fn(|rt: SessionRuntime, _| async move {
                tracing::warn!(target: "swarmr::action", "app closed by the engine");
                rt.set_app(AppContext::default());
                Ok(())
            })),
            false,
        )?;

        let app_id = self.app_id.clone();
        rt.set_restore_hook(Some(restore_fn(move |rt: SessionRuntime| {
            let app_id = app_id.clone();
            async move {
                let state = ActionState::new("openapp", "restore", rt.counters().clone());
                open_doc(&rt, &state, &app_id).await.map(drop)
            }
        })));
        Ok(())
    }

    fn aborts_iteration_on_error(&self) -> bool {
        true
    }
}
