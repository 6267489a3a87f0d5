use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::action::Action;
use crate::config::ConnectionSettings;
use crate::error::{Error, Result};
use crate::session::protocol::{METHOD_GET_LAYOUT, METHOD_GET_OBJECT};
use crate::session::{ActionState, Request, SessionRuntime, event_fn};

/// Fetches objects of the open app in parallel and keeps their layouts fresh on change.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GetObjects {
    pub ids: Vec<String>,
}

#[async_trait]
impl Action for GetObjects {
    fn validate(&self) -> Result<Vec<String>> {
        if self.ids.is_empty() {
            return Ok(vec!["no object ids listed; the action does nothing".to_string()]);
        }
        Ok(Vec::new())
    }

    async fn execute(
        &self,
        rt: &SessionRuntime,
        state: &Arc<ActionState>,
        _connection: &ConnectionSettings,
        _label: &str,
        _reset: &(dyn Fn() + Send + Sync),
    ) -> Result<()> {
        let doc = rt
            .app()
            .handle
            .ok_or_else(|| Error::Action("no app is open".to_string()))?;

        for id in &self.ids {
            rt.queue_request_then(
                state,
                Request::new(METHOD_GET_OBJECT)
                    .on(doc)
                    .params(json!({ "id": id })),
                true,
                format!("get object `{id}`"),
                |rt, state, reply| async move {
                    let handle = reply
                        .get("handle")
                        .and_then(Value::as_i64)
                        .ok_or_else(|| Error::Protocol("object reply has no handle".to_string()))?;

                    rt.register_event(
                        handle,
                        event_fn(move |rt: SessionRuntime, state: Arc<ActionState>| async move {
                            rt.send_request(&state, Request::new(METHOD_GET_LAYOUT).on(handle))
                                .await
                                .map(drop)
                        }),
                        None,
                        true,
                    )?;
                    rt.queue_request(
                        &state,
                        Request::new(METHOD_GET_LAYOUT).on(handle),
                        true,
                        "get layout",
                    );
                    Ok(())
                },
            );
        }
        Ok(())
    }
}
