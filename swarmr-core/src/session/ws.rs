use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::transport::{Connector, FrameSink, FrameStream, Transport};
use crate::config::ConnectionSettings;
use crate::error::{Error, Result};
use crate::users::User;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector: one socket per session, JSON text frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, settings: &ConnectionSettings, user: &User) -> Result<Transport> {
        let url = settings.url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|err| Error::Connect(err.to_string()))?;

        let headers = request.headers_mut();
        for (name, value) in &settings.headers {
            headers.insert(header_name(name)?, header_value(value)?);
        }
        if !user.is_anonymous() {
            headers.insert(
                header_name(&settings.user_header)?,
                header_value(&user.qualified_name())?,
            );
        }

        let (ws, _response) = tokio::time::timeout(settings.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                Error::Connect(format!("timed out after {:?}", settings.connect_timeout))
            })?
            .map_err(|err| Error::Connect(err.to_string()))?;

        let (sink, stream) = ws.split();
        Ok(Transport {
            sink: Box::new(WsSink(sink)),
            stream: Box::new(WsFrames(stream)),
        })
    }
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|err| Error::Connect(format!("invalid header name `{name}`: {err}")))
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|err| Error::Connect(format!("invalid header value: {err}")))
}

struct WsSink(SplitSink<WsStream, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, text: String) -> Result<()> {
        self.0.send(Message::text(text)).await.map_err(|err| {
            tracing::debug!(error = %err, "websocket send failed");
            Error::ConnectionLost
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.0.close().await.map_err(|_| Error::ConnectionLost)
    }
}

struct WsFrames(SplitStream<WsStream>);

#[async_trait]
impl FrameStream for WsFrames {
    async fn next_frame(&mut self) -> Option<Result<String>> {
        loop {
            match self.0.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(err) => {
                    tracing::debug!(error = %err, "websocket read failed");
                    return Some(Err(Error::ConnectionLost));
                }
            }
        }
    }
}
