use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::protocol::Handle;
use super::runtime::SessionRuntime;
use super::state::ActionState;
use crate::error::Result;

/// Callback for a pushed change or close of one handle.
///
/// Runs with the session and the action that is current when the notification arrives.
pub type EventFn =
    Arc<dyn Fn(SessionRuntime, Arc<ActionState>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventKind {
    Change,
    Close,
}

pub(crate) struct Registration {
    pub subscription: u64,
    pub tx: mpsc::UnboundedSender<EventKind>,
    pub task: JoinHandle<()>,
}

/// Session-local handle -> dispatcher table.
///
/// Each handle has its own dispatch task fed through a queue, so notifications for one handle run
/// one at a time while different handles run concurrently.
#[derive(Default)]
pub(crate) struct EventTable {
    entries: Mutex<HashMap<Handle, Registration>>,
}

impl EventTable {
    /// Installs `reg`, returning the subscription it replaced.
    pub fn insert(&self, handle: Handle, reg: Registration) -> Option<u64> {
        let stale = self.entries.lock().insert(handle, reg)?;
        stale.task.abort();
        Some(stale.subscription)
    }

    pub fn remove(&self, handle: Handle) -> Option<u64> {
        let reg = self.entries.lock().remove(&handle)?;
        reg.task.abort();
        Some(reg.subscription)
    }

    /// Removes everything, oldest subscription first.
    pub fn drain(&self) -> Vec<(Handle, u64)> {
        let drained: Vec<(Handle, Registration)> = self.entries.lock().drain().collect();
        let mut out: Vec<(Handle, u64)> = drained
            .into_iter()
            .map(|(handle, reg)| {
                reg.task.abort();
                (handle, reg.subscription)
            })
            .collect();
        out.sort_by_key(|(_, sub)| *sub);
        out
    }

    /// Live subscriptions, oldest first.
    pub fn subscriptions(&self) -> Vec<(Handle, u64)> {
        let mut out: Vec<(Handle, u64)> = self
            .entries
            .lock()
            .iter()
            .map(|(handle, reg)| (*handle, reg.subscription))
            .collect();
        out.sort_by_key(|(_, sub)| *sub);
        out
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.entries.lock().contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Queues `kind` for `handle`. A close also drops the registration; its task finishes the
    /// queued notifications and then exits.
    pub fn dispatch(&self, handle: Handle, kind: EventKind) -> bool {
        let mut entries = self.entries.lock();
        match kind {
            EventKind::Change => entries
                .get(&handle)
                .is_some_and(|reg| reg.tx.send(kind).is_ok()),
            EventKind::Close => entries
                .remove(&handle)
                .is_some_and(|reg| reg.tx.send(kind).is_ok()),
        }
    }
}
