use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Value;
use swarmr_metrics::ExecutionCounters;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::events::{EventFn, EventKind, EventTable, Registration};
use super::link::{Link, LinkStatus, Reply};
use super::protocol::{self, Handle, METHOD_SUBSCRIBE, METHOD_UNSUBSCRIBE, Request};
use super::state::ActionState;
use super::transport::Connector;
use crate::config::ConnectionSettings;
use crate::error::{Error, Result};
use crate::users::User;

const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Re-establishes remote context (e.g. re-opens the app) on a fresh connection.
pub type RestoreFn = Arc<dyn Fn(SessionRuntime) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// The app the session currently works in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppContext {
    pub app_id: Option<String>,
    pub handle: Option<Handle>,
}

/// Everything needed to open one session.
pub struct SessionParams {
    pub vu: u64,
    /// Identity draw number; also the session number in logs.
    pub session: u64,
    pub user: User,
    pub connection: ConnectionSettings,
    pub connector: Arc<dyn Connector>,
    pub counters: Arc<ExecutionCounters>,
    pub request_timeout: Duration,
    pub cancel: CancellationToken,
    pub output_dir: PathBuf,
    pub traffic: bool,
    pub seed: u64,
}

struct Inner {
    vu: u64,
    session: u64,
    user: User,
    connection: ConnectionSettings,
    connector: Arc<dyn Connector>,
    counters: Arc<ExecutionCounters>,
    request_timeout: Duration,
    cancel: CancellationToken,
    output_dir: PathBuf,
    traffic: bool,
    /// Endpoint path used as the request statistics key.
    path: String,
    seq: AtomicU64,
    link: Mutex<Option<Arc<Link>>>,
    events: Arc<EventTable>,
    current: Mutex<Arc<ActionState>>,
    app: Mutex<AppContext>,
    restore: Mutex<Option<RestoreFn>>,
    rng: Mutex<StdRng>,
}

/// One virtual user's connection plus everything scripted actions use to drive it.
///
/// Cheap to clone; clones share the session. Requests are written in the order they are
/// submitted, replies and pushed events are dispatched as they arrive.
#[derive(Clone)]
pub struct SessionRuntime {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRuntime")
            .field("vu", &self.inner.vu)
            .field("session", &self.inner.session)
            .field("user", &self.inner.user.username)
            .finish_non_exhaustive()
    }
}

struct Submitted {
    id: u64,
    link: Arc<Link>,
    method: String,
    rx: oneshot::Receiver<Result<Reply>>,
    sent: u64,
    started: Instant,
}

impl SessionRuntime {
    pub async fn connect(params: SessionParams) -> Result<Self> {
        let path = params.connection.url()?.path().to_string();
        let transport = params
            .connector
            .connect(&params.connection, &params.user)
            .await?;

        let events = Arc::new(EventTable::default());
        let link = Link::open(transport, events.clone(), params.traffic);
        let idle = ActionState::new("", "", params.counters.clone());

        tracing::debug!(user = %params.user.qualified_name(), "session connected");

        Ok(Self {
            inner: Arc::new(Inner {
                vu: params.vu,
                session: params.session,
                user: params.user,
                connection: params.connection,
                connector: params.connector,
                counters: params.counters,
                request_timeout: params.request_timeout,
                cancel: params.cancel,
                output_dir: params.output_dir,
                traffic: params.traffic,
                path,
                seq: AtomicU64::new(0),
                link: Mutex::new(Some(Arc::new(link))),
                events,
                current: Mutex::new(idle),
                app: Mutex::new(AppContext::default()),
                restore: Mutex::new(None),
                rng: Mutex::new(StdRng::seed_from_u64(params.seed)),
            }),
        })
    }

    pub fn vu(&self) -> u64 {
        self.inner.vu
    }

    pub fn session(&self) -> u64 {
        self.inner.session
    }

    pub fn user(&self) -> &User {
        &self.inner.user
    }

    pub fn connection(&self) -> &ConnectionSettings {
        &self.inner.connection
    }

    pub fn counters(&self) -> &Arc<ExecutionCounters> {
        &self.inner.counters
    }

    pub fn output_dir(&self) -> &Path {
        &self.inner.output_dir
    }

    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolves when the run is cancelled.
    pub async fn cancelled(&self) {
        self.inner.cancel.cancelled().await;
    }

    /// Next value of the session sequence (request and subscription ids).
    pub fn next_id(&self) -> u64 {
        self.inner.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Starts a new action: its state becomes the target of event callbacks.
    pub fn begin_action(&self, action: &str, label: &str) -> Arc<ActionState> {
        let state = ActionState::new(action, label, self.inner.counters.clone());
        *self.inner.current.lock() = state.clone();
        state
    }

    pub fn current_state(&self) -> Arc<ActionState> {
        self.inner.current.lock().clone()
    }

    fn submit(&self, req: &Request) -> Result<Submitted> {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let (id, link, rx, sent) = {
            let link = self.inner.link.lock();
            let link = link.as_ref().ok_or(Error::ConnectionLost)?;
            let id = self.next_id();
            let text = protocol::encode_request(id, req)?;
            let sent = text.len() as u64;
            let rx = link.request(id, text)?;
            (id, link.clone(), rx, sent)
        };

        self.inner.counters.requests.inc();
        Ok(Submitted {
            id,
            link,
            method: req.method.clone(),
            rx,
            sent,
            started: Instant::now(),
        })
    }

    async fn await_reply(&self, state: &ActionState, sub: Submitted) -> Result<Value> {
        let timeout = self.inner.request_timeout;
        let outcome = tokio::select! {
            _ = self.inner.cancel.cancelled() => Err(Error::Cancelled),
            reply = tokio::time::timeout(timeout, sub.rx) => match reply {
                Err(_) => Err(Error::Timeout { method: sub.method.clone(), timeout }),
                Ok(Err(_)) => Err(Error::ConnectionLost),
                Ok(Ok(reply)) => reply,
            },
        };

        if matches!(outcome, Err(Error::Cancelled | Error::Timeout { .. })) {
            sub.link.forget(sub.id);
        }

        let received = outcome.as_ref().map_or(0, |reply| reply.size);
        state.add_traffic(sub.sent, received);

        match &outcome {
            Err(Error::Cancelled) => {}
            Err(Error::ConnectionLost) => state.mark_connection_lost(),
            _ => self.record_request(
                &sub.method,
                outcome.is_ok(),
                sub.started.elapsed(),
                sub.sent,
                received,
            ),
        }

        outcome.map(|reply| reply.result)
    }

    fn record_request(&self, method: &str, ok: bool, elapsed: Duration, sent: u64, received: u64) {
        tracing::debug!(
            target: "swarmr::metrics",
            method,
            ok,
            elapsed_us = elapsed.as_micros() as u64,
            sent,
            received,
            "request"
        );

        if let Some(stats) = self.inner.counters.statistics()
            && stats.level().requests_enabled()
        {
            stats
                .get_or_add_request_stats(method, &self.inner.path)
                .record(ok, elapsed, sent, received);
        }
    }

    /// Sends `req` and waits for its result. Counts as critical work of `state`.
    pub async fn send_request(&self, state: &Arc<ActionState>, req: Request) -> Result<Value> {
        let _pending = state.begin(true);
        let sub = match self.submit(&req) {
            Ok(sub) => sub,
            Err(err) => {
                if err.is_connection_lost() {
                    state.mark_connection_lost();
                }
                return Err(err);
            }
        };
        self.await_reply(state, sub).await
    }

    /// Sends `req` without waiting. With `fail_on_error` a failure becomes an error on `state`,
    /// otherwise it is only logged.
    pub fn queue_request(
        &self,
        state: &Arc<ActionState>,
        req: Request,
        fail_on_error: bool,
        err_msg: impl Into<String>,
    ) {
        self.queue_request_then(state, req, fail_on_error, err_msg, |_, _, _| async {
            Ok(())
        });
    }

    /// Like [`queue_request`](Self::queue_request), then runs `then` with the result. Work queued
    /// from `then` on the same state keeps [`wait`](Self::wait) blocked.
    pub fn queue_request_then<F, Fut>(
        &self,
        state: &Arc<ActionState>,
        req: Request,
        fail_on_error: bool,
        err_msg: impl Into<String>,
        then: F,
    ) where
        F: FnOnce(SessionRuntime, Arc<ActionState>, Value) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let guard = state.begin(fail_on_error);
        let submitted = self.submit(&req);
        let err_msg = err_msg.into();
        let rt = self.clone();
        let state = state.clone();

        tokio::spawn(
            async move {
                let _guard = guard;
                let result = match submitted {
                    Ok(sub) => rt.await_reply(&state, sub).await,
                    Err(err) => Err(err),
                };
                let result = match result {
                    Ok(value) => then(rt.clone(), state.clone(), value).await,
                    Err(err) => Err(err),
                };
                if let Err(err) = result {
                    queued_failure(&state, fail_on_error, &err_msg, err);
                }
            }
            .in_current_span(),
        );
    }

    /// Subscribes `on_event` (and optionally `on_close`) to pushes for `handle`, replacing and
    /// unsubscribing any earlier registration for the same handle.
    pub fn register_event(
        &self,
        handle: Handle,
        on_event: EventFn,
        on_close: Option<EventFn>,
        fail_on_error: bool,
    ) -> Result<()> {
        let subscription = self.next_id();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(
            dispatch_events(
                Arc::downgrade(&self.inner),
                handle,
                on_event,
                on_close,
                fail_on_error,
                rx,
            )
            .in_current_span(),
        );

        let stale = self.inner.events.insert(
            handle,
            Registration {
                subscription,
                tx,
                task,
            },
        );
        if let Some(stale) = stale {
            tracing::debug!(handle, stale, "replacing event registration");
            self.notify(METHOD_UNSUBSCRIBE, handle, stale)?;
        }
        self.notify(METHOD_SUBSCRIBE, handle, subscription)
    }

    pub fn deregister_event(&self, handle: Handle) -> Result<()> {
        match self.inner.events.remove(handle) {
            Some(subscription) => self.notify(METHOD_UNSUBSCRIBE, handle, subscription),
            None => Ok(()),
        }
    }

    pub fn has_event(&self, handle: Handle) -> bool {
        self.inner.events.contains(handle)
    }

    pub fn event_count(&self) -> usize {
        self.inner.events.len()
    }

    fn notify(&self, method: &str, handle: Handle, subscription: u64) -> Result<()> {
        let text = protocol::encode_subscription(method, handle, subscription)?;
        let link = self.inner.link.lock();
        link.as_ref().ok_or(Error::ConnectionLost)?.notify(text)
    }

    /// Blocks until all work queued for `state` is done (or the run is cancelled).
    /// Returns whether the action failed.
    pub async fn wait(&self, state: &ActionState) -> bool {
        tokio::select! {
            _ = self.inner.cancel.cancelled() => {}
            _ = state.wait_idle() => {}
        }
        state.failed()
    }

    /// Like [`wait`](Self::wait) but ignores best-effort requests.
    pub async fn wait_critical(&self, state: &ActionState) -> bool {
        tokio::select! {
            _ = self.inner.cancel.cancelled() => {}
            _ = state.wait_critical() => {}
        }
        state.failed()
    }

    /// Forgets the current app: all events are unsubscribed and no restore hook remains.
    pub fn reset_app_context(&self) {
        *self.inner.app.lock() = AppContext::default();
        *self.inner.restore.lock() = None;
        for (handle, subscription) in self.inner.events.drain() {
            let _ = self.notify(METHOD_UNSUBSCRIBE, handle, subscription);
        }
    }

    pub fn app(&self) -> AppContext {
        self.inner.app.lock().clone()
    }

    pub fn set_app(&self, app: AppContext) {
        *self.inner.app.lock() = app;
    }

    pub fn set_restore_hook(&self, hook: Option<RestoreFn>) {
        *self.inner.restore.lock() = hook;
    }

    pub fn with_rng<R>(&self, f: impl FnOnce(&mut StdRng) -> R) -> R {
        f(&mut self.inner.rng.lock())
    }

    pub fn is_connection_lost(&self) -> bool {
        self.inner
            .link
            .lock()
            .as_ref()
            .is_none_or(|link| link.status() == LinkStatus::Lost)
    }

    /// Opens a fresh connection, restores the app context and re-subscribes, in their original
    /// order, the registrations that were live when the connection dropped.
    pub async fn reconnect(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let transport = self
            .inner
            .connector
            .connect(&self.inner.connection, &self.inner.user)
            .await?;
        let link = Arc::new(Link::open(
            transport,
            self.inner.events.clone(),
            self.inner.traffic,
        ));
        let old = self.inner.link.lock().replace(link);
        if let Some(old) = old {
            old.abort();
        }

        let subscribed = self.inner.events.subscriptions();
        let hook = self.inner.restore.lock().clone();
        if let Some(hook) = hook {
            hook(self.clone()).await?;
        }

        // Registrations the hook made or replaced are already on the new link.
        let live = self.inner.events.subscriptions();
        for (handle, subscription) in subscribed {
            if live.contains(&(handle, subscription)) {
                self.notify(METHOD_SUBSCRIBE, handle, subscription)?;
            }
        }
        Ok(())
    }

    /// Unsubscribes everything and closes the connection.
    pub async fn close(&self) {
        for (handle, subscription) in self.inner.events.drain() {
            let _ = self.notify(METHOD_UNSUBSCRIBE, handle, subscription);
        }

        let link = self.inner.link.lock().take();
        if let Some(link) = link {
            link.close(CLOSE_GRACE).await;
        }
        tracing::debug!("session closed");
    }
}

fn queued_failure(state: &ActionState, fail_on_error: bool, err_msg: &str, err: Error) {
    match err {
        Error::Cancelled => {}
        Error::ConnectionLost => state.mark_connection_lost(),
        err if fail_on_error => {
            if err_msg.is_empty() {
                state.add_error(err.to_string());
            } else {
                state.add_error(format!("{err_msg}: {err}"));
            }
        }
        err => tracing::debug!(
            target: "swarmr::action",
            action = %state.action(),
            error = %err,
            message = %err_msg,
            "best-effort request failed"
        ),
    }
}

async fn dispatch_events(
    inner: Weak<Inner>,
    handle: Handle,
    on_event: EventFn,
    on_close: Option<EventFn>,
    fail_on_error: bool,
    mut rx: mpsc::UnboundedReceiver<EventKind>,
) {
    while let Some(kind) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let rt = SessionRuntime { inner };
        let state = rt.current_state();

        let callback = match kind {
            EventKind::Change => Some(&on_event),
            EventKind::Close => on_close.as_ref(),
        };
        if let Some(callback) = callback
            && let Err(err) = callback(rt.clone(), state.clone()).await
        {
            if fail_on_error {
                state.fail_with(&err);
            } else {
                tracing::debug!(handle, error = %err, "event callback failed");
            }
        }

        if kind == EventKind::Close {
            break;
        }
    }
}
