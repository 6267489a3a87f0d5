//! JSON frames exchanged with the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Server-assigned object id.
pub type Handle = i64;

/// Calls that are not bound to an object.
pub const NO_HANDLE: Handle = -1;

pub const METHOD_OPEN_DOC: &str = "OpenDoc";
pub const METHOD_GET_OBJECT: &str = "GetObject";
pub const METHOD_GET_LAYOUT: &str = "GetLayout";
pub const METHOD_SUBSCRIBE: &str = "Subscribe";
pub const METHOD_UNSUBSCRIBE: &str = "Unsubscribe";

/// One engine call, before it gets a request id.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub handle: Handle,
    pub params: Value,
}

impl Request {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            handle: NO_HANDLE,
            params: Value::Object(Default::default()),
        }
    }

    #[must_use]
    pub fn on(mut self, handle: Handle) -> Self {
        self.handle = handle;
        self
    }

    #[must_use]
    pub fn params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

#[derive(Serialize)]
struct OutFrame<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    handle: Handle,
    method: &'a str,
    params: &'a Value,
}

pub(crate) fn encode_request(id: u64, req: &Request) -> Result<String> {
    Ok(serde_json::to_string(&OutFrame {
        jsonrpc: "2.0",
        id: Some(id),
        handle: req.handle,
        method: &req.method,
        params: &req.params,
    })?)
}

/// Subscribe/unsubscribe notice; notifications carry no id and get no reply.
pub(crate) fn encode_subscription(method: &str, handle: Handle, subscription: u64) -> Result<String> {
    Ok(serde_json::to_string(&OutFrame {
        jsonrpc: "2.0",
        id: None,
        handle,
        method,
        params: &serde_json::json!({ "subscription": subscription }),
    })?)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        Self::Remote {
            code: err.code,
            message: err.message,
        }
    }
}

/// A response (has `id`) or a push (no `id`). Both may carry change/close lists.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct InFrame {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RemoteError>,
    #[serde(default)]
    pub change: Vec<Handle>,
    #[serde(default)]
    pub close: Vec<Handle>,
}

pub(crate) fn decode(text: &str) -> Result<InFrame> {
    serde_json::from_str(text).map_err(|err| Error::Protocol(format!("bad frame: {err}")))
}
