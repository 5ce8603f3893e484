//! Transport abstraction and connection status.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, stream::BoxStream};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reachability of the two-hop transport (client -> router -> server).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// `connect()` not called yet, or the connection was destroyed.
    #[default]
    NotStarted,
    /// Link opening or registration handshake in flight.
    Connecting,
    /// Both hops reachable and registered.
    Connected,
    /// Router unreachable; retrying with backoff.
    ReconnectingRouter,
    /// Router reachable, server not; retrying with backoff.
    ReconnectingServer,
    /// Router retries exhausted.
    DisconnectedRouter,
    /// Server retries exhausted.
    DisconnectedServer,
}

impl ConnectionStatus {
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Retries exhausted on one hop; only `destroy()` leaves this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::DisconnectedRouter | Self::DisconnectedServer)
    }
}

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Router unreachable: {0}")]
    Unreachable(String),
    #[error("Link closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Outbound half of a link: accepts encoded text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a link: yields encoded text frames.
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

/// One open connection to the router.
///
/// Ends when the stream yields `None` or an error.
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Link {
    #[must_use]
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Opens links to the router.
///
/// Implement this trait to plug in a different channel; the client owns
/// reconnect policy and only asks for one link at a time.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new link to the router.
    async fn open(&self) -> Result<Link, TransportError>;
}
