//! Generic built-in actions. Engine-specific vocabularies register their own.

mod disconnectapp;
mod getobjects;
mod openapp;
mod request;
mod thinktime;

pub use disconnectapp::DisconnectApp;
pub use getobjects::GetObjects;
pub use openapp::OpenApp;
pub use request::RequestAction;
pub use thinktime::{ThinkTime, ThinkTimeKind};

use crate::action::ActionRegistry;

pub(crate) fn register_builtins(registry: &mut ActionRegistry) {
    registry.register_settings::<OpenApp>("openapp");
    registry.register_settings::<RequestAction>("request");
    registry.register_settings::<GetObjects>("getobjects");
    registry.register_settings::<ThinkTime>("thinktime");
    registry.register_settings::<DisconnectApp>("disconnectapp");
}
