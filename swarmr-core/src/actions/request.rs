use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::Action;
use crate::config::ConnectionSettings;
use crate::error::{Error, Result};
use crate::session::{ActionState, Handle, NO_HANDLE, Request, SessionRuntime};

/// A single engine call, awaited or queued.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RequestAction {
    pub method: String,

    /// Target object; `-1` or absent for calls not bound to an object.
    #[serde(default)]
    pub handle: Option<Handle>,

    #[serde(default)]
    pub params: Value,

    /// Queue the call and move on without waiting for its result.
    #[serde(default, rename = "async")]
    pub is_async: bool,

    #[serde(default = "default_fail_on_error")]
    pub fail_on_error: bool,

    /// File name under the output dir to write the result to, prefixed per session.
    #[serde(default)]
    pub save_as: Option<String>,
}

fn default_fail_on_error() -> bool {
    true
}

impl RequestAction {
    fn request(&self) -> Request {
        let params = if self.params.is_null() {
            Value::Object(Default::default())
        } else {
            self.params.clone()
        };
        Request::new(&self.method)
            .on(self.handle.unwrap_or(NO_HANDLE))
            .params(params)
    }
}

async fn save_result(rt: &SessionRuntime, name: &str, result: &Value) -> Result<()> {
    let path = rt
        .output_dir()
        .join(format!("vu{}-s{}-{name}", rt.vu(), rt.session()));
    let body = serde_json::to_vec_pretty(result)?;
    tokio::fs::write(&path, body).await?;
    tracing::debug!(target: "swarmr::action", path = %path.display(), "result saved");
    Ok(())
}

#[async_trait]
impl Action for RequestAction {
    fn validate(&self) -> Result<Vec<String>> {
        if self.method.trim().is_empty() {
            return Err(Error::InvalidActionSettings {
                action: "request".to_string(),
                message: "`method` must not be empty".to_string(),
            });
        }
        if let Some(name) = &self.save_as
            && Path::new(name).file_name().and_then(|n| n.to_str()) != Some(name.as_str())
        {
            return Err(Error::InvalidActionSettings {
                action: "request".to_string(),
                message: format!("`saveAs` must be a plain file name, got `{name}`"),
            });
        }
        let mut warnings = Vec::new();
        if self.is_async && !self.fail_on_error {
            warnings.push(format!(
                "`{}` is async and best-effort; its failures are never reported",
                self.method
            ));
        }
        Ok(warnings)
    }

    async fn execute(
        &self,
        rt: &SessionRuntime,
        state: &Arc<ActionState>,
        _connection: &ConnectionSettings,
        _label: &str,
        _reset: &(dyn Fn() + Send + Sync),
    ) -> Result<()> {
        if self.is_async {
            let save_as = self.save_as.clone();
            rt.queue_request_then(
                state,
                self.request(),
                self.fail_on_error,
                format!("{} failed", self.method),
                move |rt, _, result| async move {
                    match save_as {
                        Some(name) => save_result(&rt, &name, &result).await,
                        None => Ok(()),
                    }
                },
            );
            return Ok(());
        }

        match rt.send_request(state, self.request()).await {
            Ok(result) => match &self.save_as {
                Some(name) => save_result(rt, name, &result).await,
                None => Ok(()),
            },
            Err(err) if !self.fail_on_error && !err.is_connection_lost() => {
                tracing::debug!(target: "swarmr::action", method = %self.method, error = %err, "ignored");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn is_fire_and_forget(&self) -> bool {
        self.is_async
    }
}
