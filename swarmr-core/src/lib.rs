pub mod action;
pub mod actions;
pub mod config;
mod error;
pub mod gate;
pub mod random;
pub mod reconnect;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod status;
pub mod summary;
pub mod timebuffer;
pub mod users;
mod vu;

pub use action::{Action, ActionRegistry, ScenarioAction, ScenarioStep};
pub use config::{
    ConnectionSettings, ReconnectSettings, SchedulerConfig, SchedulerKind, SchedulerSettings,
};
pub use error::{Error, Result};
pub use reconnect::{ReconnectManager, ReconnectState};
pub use runner::{ActionOutcome, ActionRunner};
pub use scheduler::{RunContext, Scheduler, SimpleScheduler, validate_run};
pub use session::{ActionState, SessionRuntime};
pub use status::{StatusFn, StatusUpdate, log_status};
pub use summary::{RunSummary, SummaryLevel};
pub use timebuffer::{TimeBuffer, TimeBufferMode};
pub use users::{LoginSettings, User, UserGenerator};
