//! WebSocket transport to the router.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use live_task_core::{Link, Transport, TransportError};
use tokio_tungstenite::tungstenite::Message;

/// Opens one WebSocket per link to the router.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    /// Create a transport for the router endpoint (`ws://` or `wss://`).
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self) -> Result<Link, TransportError> {
        let (socket, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        tracing::debug!(url = %self.url, "websocket open");

        let (sender, receiver) = socket.split();

        let sink = sender
            .sink_map_err(|e| TransportError::Protocol(e.to_string()))
            .with(|frame: String| future::ready(Ok::<_, TransportError>(Message::Text(frame))));

        let stream = receiver.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        tracing::warn!("dropping non-UTF-8 binary frame");
                        None
                    }
                },
                Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::Protocol(e.to_string()))),
            })
        });

        Ok(Link::new(Box::pin(sink), Box::pin(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_router() {
        // Port 9 (discard) is closed on test hosts; connecting must fail fast.
        let transport = WebSocketTransport::new("ws://127.0.0.1:9/socket");
        let result = transport.open().await;
        assert!(matches!(result, Err(TransportError::Unreachable(_))));
    }
}
