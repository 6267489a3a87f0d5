use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, sleep};

pub const PATH_APP: &str = "/app";
pub const USER_HEADER: &str = "x-swarmr-user";

pub const METHOD_OPEN_DOC: &str = "OpenDoc";
pub const METHOD_GET_OBJECT: &str = "GetObject";
pub const METHOD_GET_LAYOUT: &str = "GetLayout";
pub const METHOD_ECHO: &str = "Echo";
pub const METHOD_SLEEP: &str = "Sleep";
pub const METHOD_FAIL: &str = "Fail";
pub const METHOD_CHANGE: &str = "Change";
pub const METHOD_PUSH: &str = "Push";
pub const METHOD_CLOSE: &str = "Close";
pub const METHOD_DROP: &str = "Drop";
pub const METHOD_SUBSCRIBE: &str = "Subscribe";
pub const METHOD_UNSUBSCRIBE: &str = "Unsubscribe";

/// One frame received by the server on a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct WireEntry {
    pub id: Option<u64>,
    pub handle: i64,
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Clone)]
pub struct ConnectionLog {
    pub user: Option<String>,
    pub accepted_at: Instant,
    pub frames: Vec<WireEntry>,
}

#[derive(Debug, Default)]
struct StatsInner {
    requests_total: AtomicU64,
    attempts: Mutex<Vec<Instant>>,
    connections: Mutex<Vec<ConnectionLog>>,
    refuse_remaining: AtomicU64,
    drops_armed: AtomicU64,
    refuse_after_drop: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    inner: Arc<StatsInner>,
}

impl TestServerStats {
    fn record_attempt(&self) {
        self.inner
            .attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Instant::now());
    }

    fn open_connection(&self, user: Option<String>) -> usize {
        let mut conns = self
            .inner
            .connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        conns.push(ConnectionLog {
            user,
            accepted_at: Instant::now(),
            frames: Vec::new(),
        });
        conns.len() - 1
    }

    fn log_frame(&self, conn: usize, entry: WireEntry) {
        if entry.id.is_some() {
            self.inner.requests_total.fetch_add(1, Ordering::Relaxed);
        }
        let mut conns = self
            .inner
            .connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(c) = conns.get_mut(conn) {
            c.frames.push(entry);
        }
    }

    fn take_refusal(&self) -> bool {
        self.inner
            .refuse_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    fn take_drop(&self) -> bool {
        let armed = self
            .inner
            .drops_armed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            let refuse = self.inner.refuse_after_drop.load(Ordering::Acquire);
            self.inner.refuse_remaining.store(refuse, Ordering::Release);
        }
        armed
    }

    /// Requests (frames with an id) received across all connections.
    pub fn requests_total(&self) -> u64 {
        self.inner.requests_total.load(Ordering::Relaxed)
    }

    /// Every upgrade attempt, including refused ones, in arrival order.
    pub fn connection_attempts(&self) -> Vec<Instant> {
        self.inner
            .attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn connections(&self) -> Vec<ConnectionLog> {
        self.inner
            .connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn connections_total(&self) -> usize {
        self.inner
            .connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Methods received on a connection, in wire order.
    pub fn methods(&self, conn: usize) -> Vec<String> {
        self.inner
            .connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(conn)
            .map(|c| c.frames.iter().map(|f| f.method.clone()).collect())
            .unwrap_or_default()
    }

    pub fn users(&self) -> Vec<Option<String>> {
        self.connections().into_iter().map(|c| c.user).collect()
    }
}

#[derive(Debug, Deserialize)]
struct Incoming {
    id: Option<u64>,
    #[serde(default = "default_handle")]
    handle: i64,
    method: String,
    #[serde(default)]
    params: Value,
}

fn default_handle() -> i64 {
    -1
}

struct Session {
    conn: usize,
    stats: TestServerStats,
    out: mpsc::UnboundedSender<String>,
    next_handle: AtomicI64,
    subscriptions: Mutex<HashSet<(i64, u64)>>,
}

impl Session {
    fn send(&self, frame: Value) {
        let _ = self.out.send(frame.to_string());
    }

    fn respond(&self, id: Option<u64>, result: Value) {
        if let Some(id) = id {
            self.send(json!({"jsonrpc": "2.0", "id": id, "result": result}));
        }
    }

    fn respond_with(&self, id: Option<u64>, result: Value, key: &str, handles: &[i64]) {
        if let Some(id) = id {
            let mut frame = json!({"jsonrpc": "2.0", "id": id, "result": result});
            if let Some(obj) = frame.as_object_mut() {
                obj.insert(key.to_string(), json!(handles));
            }
            self.send(frame);
        }
    }

    fn fail(&self, id: Option<u64>, code: i64, message: &str) {
        if let Some(id) = id {
            self.send(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": code, "message": message},
            }));
        }
    }

    fn alloc_handle(&self) -> i64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn subscribed(&self, handle: i64) -> bool {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .any(|(h, _)| *h == handle)
    }

    fn set_subscription(&self, handle: i64, params: &Value, on: bool) {
        let Some(sub) = params.get("subscription").and_then(Value::as_u64) else {
            return;
        };
        let mut subs = self
            .subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if on {
            subs.insert((handle, sub));
        } else {
            subs.remove(&(handle, sub));
        }
    }
}

fn handles_param(params: &Value) -> Vec<i64> {
    params
        .get("handles")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default()
}

/// Outcome of handling a frame: keep serving or drop the socket.
enum Flow {
    Continue,
    Drop,
    DropAfter(Duration),
}

fn handle_frame(session: &Arc<Session>, msg: Incoming) -> Flow {
    session.stats.log_frame(
        session.conn,
        WireEntry {
            id: msg.id,
            handle: msg.handle,
            method: msg.method.clone(),
            params: msg.params.clone(),
        },
    );

    let id = msg.id;
    match msg.method.as_str() {
        METHOD_SUBSCRIBE => session.set_subscription(msg.handle, &msg.params, true),
        METHOD_UNSUBSCRIBE => session.set_subscription(msg.handle, &msg.params, false),
        METHOD_OPEN_DOC => {
            let app = msg.params.get("appId").cloned().unwrap_or(Value::Null);
            if app.is_null() {
                session.fail(id, 1002, "appId is required");
            } else {
                let handle = session.alloc_handle();
                session.respond(id, json!({"handle": handle, "type": "Doc", "id": app}));
            }
        }
        METHOD_GET_OBJECT => {
            let obj = msg.params.get("id").cloned().unwrap_or(Value::Null);
            let handle = session.alloc_handle();
            session.respond(
                id,
                json!({"handle": handle, "type": "GenericObject", "id": obj}),
            );
        }
        METHOD_GET_LAYOUT => session.respond(id, json!({"handle": msg.handle})),
        METHOD_ECHO => session.respond(id, msg.params),
        METHOD_SLEEP => {
            let ms = msg.params.get("ms").and_then(Value::as_u64).unwrap_or(0);
            let session = session.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(ms)).await;
                session.respond(id, json!({"slept": ms}));
            });
        }
        METHOD_FAIL => {
            let message = msg
                .params
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("requested failure");
            session.fail(id, 1000, message);
        }
        METHOD_CHANGE => {
            session.respond_with(id, json!({}), "change", &handles_param(&msg.params));
        }
        METHOD_CLOSE => {
            session.respond_with(id, json!({}), "close", &handles_param(&msg.params));
        }
        METHOD_PUSH => {
            session.respond(id, json!({}));
            let handles: Vec<i64> = handles_param(&msg.params)
                .into_iter()
                .filter(|h| session.subscribed(*h))
                .collect();
            if !handles.is_empty() {
                session.send(json!({"jsonrpc": "2.0", "change": handles}));
            }
        }
        METHOD_DROP => {
            if session.stats.take_drop() {
                let after = msg.params.get("afterMs").and_then(Value::as_u64).unwrap_or(0);
                if after == 0 {
                    return Flow::Drop;
                }
                session.respond(id, json!({}));
                return Flow::DropAfter(Duration::from_millis(after));
            }
            session.respond(id, json!({}));
        }
        other => session.fail(id, -32601, &format!("method not found: {other}")),
    }

    Flow::Continue
}

async fn serve_session(socket: WebSocket, stats: TestServerStats, user: Option<String>) {
    let conn = stats.open_connection(user);
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let session = Arc::new(Session {
        conn,
        stats,
        out: out_tx,
        next_handle: AtomicI64::new(1),
        subscriptions: Mutex::new(HashSet::new()),
    });

    while let Some(Ok(msg)) = stream.next().await {
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };

        let incoming: Incoming = match serde_json::from_str(text.as_str()) {
            Ok(v) => v,
            Err(err) => {
                session.send(json!({
                    "jsonrpc": "2.0",
                    "error": {"code": -32700, "message": err.to_string()},
                }));
                continue;
            }
        };

        match handle_frame(&session, incoming) {
            Flow::Continue => {}
            Flow::Drop => {
                writer.abort();
                return;
            }
            Flow::DropAfter(delay) => {
                sleep(delay).await;
                writer.abort();
                return;
            }
        }
    }

    drop(session);
    let _ = writer.await;
}

async fn handle_upgrade(
    State(stats): State<TestServerStats>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    stats.record_attempt();
    if stats.take_refusal() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let user = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    ws.on_upgrade(move |socket| serve_session(socket, stats, user))
}

pub fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_APP, get(handle_upgrade))
        .with_state(stats)
}

pub struct TestServer {
    addr: SocketAddr,
    ws_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            ws_url: format!("ws://{addr}{PATH_APP}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    /// Refuse the next `n` connection attempts with 503.
    pub fn refuse_connections(&self, n: u64) {
        self.stats.inner.refuse_remaining.store(n, Ordering::Release);
    }

    /// The next `Drop` request closes its connection without a response (or, with
    /// `{"afterMs": n}`, responds and closes n ms later), after which the following
    /// `refuse_reconnects` connection attempts are refused.
    pub fn arm_drop(&self, refuse_reconnects: u64) {
        self.stats
            .inner
            .refuse_after_drop
            .store(refuse_reconnects, Ordering::Release);
        self.stats.inner.drops_armed.fetch_add(1, Ordering::AcqRel);
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
