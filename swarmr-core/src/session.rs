mod events;
mod link;
pub mod protocol;
mod runtime;
mod state;
mod transport;
mod ws;

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

pub use events::EventFn;
pub use protocol::{Handle, NO_HANDLE, RemoteError, Request};
pub use runtime::{AppContext, RestoreFn, SessionParams, SessionRuntime};
pub use state::ActionState;
pub use transport::{Connector, FrameSink, FrameStream, Transport};
pub use ws::WsConnector;

/// Wraps an async closure as an [`EventFn`].
pub fn event_fn<F, Fut>(f: F) -> EventFn
where
    F: Fn(SessionRuntime, Arc<ActionState>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = crate::Result<()>> + Send + 'static,
{
    Arc::new(
        move |rt: SessionRuntime, state: Arc<ActionState>| -> BoxFuture<'static, crate::Result<()>> {
            Box::pin(f(rt, state))
        },
    )
}

/// Wraps an async closure as a [`RestoreFn`].
pub fn restore_fn<F, Fut>(f: F) -> RestoreFn
where
    F: Fn(SessionRuntime) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = crate::Result<()>> + Send + 'static,
{
    Arc::new(
        move |rt: SessionRuntime| -> BoxFuture<'static, crate::Result<()>> { Box::pin(f(rt)) },
    )
}
