use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions;
use crate::config::ConnectionSettings;
use crate::error::{Error, Result};
use crate::session::{ActionState, SessionRuntime};

/// One scripted step.
#[async_trait]
pub trait Action: Send + Sync + std::fmt::Debug {
    /// Warnings, or an error when the settings cannot work.
    fn validate(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// `reset` clears the session's app context.
    async fn execute(
        &self,
        rt: &SessionRuntime,
        state: &Arc<ActionState>,
        connection: &ConnectionSettings,
        label: &str,
        reset: &(dyn Fn() + Send + Sync),
    ) -> Result<()>;

    /// Pacing steps are treated as already done after a reconnect.
    fn is_think_time(&self) -> bool {
        false
    }

    /// Done as soon as `execute` returns and no `fail_on_error` request is outstanding.
    fn is_fire_and_forget(&self) -> bool {
        false
    }

    /// A failure skips the rest of the iteration.
    fn aborts_iteration_on_error(&self) -> bool {
        false
    }
}

/// A scenario item as written in the config, before its settings are resolved.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioStep {
    pub action: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub settings: Value,
}

/// A resolved scenario item.
#[derive(Debug, Clone)]
pub struct ScenarioAction {
    /// Registry name, e.g. `openapp`.
    pub kind: String,
    pub label: String,
    pub action: Arc<dyn Action>,
}

impl ScenarioAction {
    pub fn new(kind: impl Into<String>, label: impl Into<String>, action: Arc<dyn Action>) -> Self {
        Self {
            kind: kind.into(),
            label: label.into(),
            action,
        }
    }
}

pub type ActionFactory = Arc<dyn Fn(Value) -> Result<Arc<dyn Action>> + Send + Sync>;

/// Maps an action name to the factory that parses its settings.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    factories: BTreeMap<String, ActionFactory>,
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        actions::register_builtins(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(Value) -> Result<Arc<dyn Action>> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.to_ascii_lowercase(), Arc::new(factory));
    }

    /// Registers `T`, parsing its settings with serde.
    pub fn register_settings<T>(&mut self, name: &'static str)
    where
        T: Action + serde::de::DeserializeOwned + 'static,
    {
        self.register(name, move |settings| {
            let settings = if settings.is_null() {
                Value::Object(Default::default())
            } else {
                settings
            };
            let action: T =
                serde_json::from_value(settings).map_err(|err| Error::InvalidActionSettings {
                    action: name.to_string(),
                    message: err.to_string(),
                })?;
            Ok(Arc::new(action) as Arc<dyn Action>)
        });
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn build(&self, step: &ScenarioStep) -> Result<ScenarioAction> {
        let kind = step.action.to_ascii_lowercase();
        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| Error::UnknownAction(step.action.clone()))?;
        let action = factory(step.settings.clone())?;
        Ok(ScenarioAction::new(kind, step.label.clone(), action))
    }

    /// Resolves every enabled step. Fails on the first unknown or invalid one.
    pub fn build_scenario(&self, steps: &[ScenarioStep]) -> Result<Vec<ScenarioAction>> {
        steps
            .iter()
            .filter(|step| !step.disabled)
            .map(|step| self.build(step))
            .collect()
    }
}

/// Validates every action, prefixing warnings with the action's position and label.
pub fn validate_scenario(scenario: &[ScenarioAction]) -> Result<Vec<String>> {
    let mut warnings = Vec::new();
    for (idx, step) in scenario.iter().enumerate() {
        for warning in step.action.validate()? {
            warnings.push(format!("action {} ({}/{}): {warning}", idx + 1, step.kind, step.label));
        }
    }
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(yaml: &str) -> Vec<ScenarioStep> {
        serde_yaml::from_str(yaml).unwrap_or_else(|err| panic!("parse failed: {err}"))
    }

    #[test]
    fn builds_builtins_and_skips_disabled() {
        let registry = ActionRegistry::with_builtins();
        let scenario = registry
            .build_scenario(&steps(
                r#"
- action: OpenApp
  label: open
  settings: { appId: sales }
- action: thinktime
  disabled: true
  settings: { type: static, delay: 1s }
- action: request
  settings: { method: Echo, params: { x: 1 } }
"#,
            ))
            .unwrap_or_else(|err| panic!("build failed: {err}"));

        let kinds: Vec<&str> = scenario.iter().map(|s| s.kind.as_str()).collect();
        assert_eq!(kinds, ["openapp", "request"]);
        assert_eq!(scenario[0].label, "open");
        assert!(scenario[0].action.aborts_iteration_on_error());
    }

    #[test]
    fn unknown_action_is_a_config_error() {
        let registry = ActionRegistry::with_builtins();
        match registry.build_scenario(&steps("- action: selectall\n")) {
            Err(err @ Error::UnknownAction(_)) => assert!(err.is_config()),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn bad_settings_name_the_action() {
        let registry = ActionRegistry::with_builtins();
        match registry.build_scenario(&steps("- action: openapp\n  settings: { appId: 3 }\n")) {
            Err(Error::InvalidActionSettings { action, .. }) => assert_eq!(action, "openapp"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn registry_lists_builtins() {
        let registry = ActionRegistry::with_builtins();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(
            names,
            ["disconnectapp", "getobjects", "openapp", "request", "thinktime"]
        );
    }

    #[test]
    fn save_as_must_be_a_file_name() {
        let registry = ActionRegistry::with_builtins();
        let scenario = registry
            .build_scenario(&steps(
                "- action: request\n  settings: { method: Echo, saveAs: ../out.json }\n",
            ))
            .unwrap_or_else(|err| panic!("build failed: {err}"));
        match validate_scenario(&scenario) {
            Err(Error::InvalidActionSettings { message, .. }) => assert!(message.contains("saveAs")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
