//! In-memory transport.
//!
//! Useful for tests and single-process demos: the `MemoryRouter` side
//! accepts each link the client opens and plays the router.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use live_task_core::{Link, Transport, TransportError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::Packet;

struct Shared {
    reachable: AtomicBool,
    opens: AtomicUsize,
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
}

/// Client side of an in-memory router.
#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

/// Router side: accepts links opened by a `MemoryTransport`.
pub struct MemoryRouter {
    shared: Arc<Shared>,
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryTransport {
    /// Create a connected transport/router pair. The router starts reachable.
    #[must_use]
    pub fn pair() -> (Self, MemoryRouter) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            reachable: AtomicBool::new(true),
            opens: AtomicUsize::new(0),
            accept_tx,
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            MemoryRouter { shared, accept_rx },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self) -> Result<Link, TransportError> {
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        if !self.shared.reachable.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("memory router offline".to_string()));
        }

        let (client_tx, router_rx) = mpsc::unbounded_channel::<String>();
        let (router_tx, client_rx) = mpsc::unbounded_channel();

        self.shared
            .accept_tx
            .send(MemoryPeer {
                inbound: router_rx,
                outbound: router_tx,
            })
            .map_err(|_| TransportError::Unreachable("memory router dropped".to_string()))?;

        let sink = futures::sink::unfold(client_tx, |tx, frame: String| async move {
            tx.send(frame).map_err(|_| TransportError::Closed)?;
            Ok::<_, TransportError>(tx)
        });
        let stream = UnboundedReceiverStream::new(client_rx);

        Ok(Link::new(Box::pin(sink), Box::pin(stream)))
    }
}

impl MemoryRouter {
    /// Make subsequent `open()` calls succeed or fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of `open()` attempts so far, failed ones included.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Wait for the client to open a link.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }
}

/// Router end of one link.
#[derive(Debug)]
pub struct MemoryPeer {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<Result<String, TransportError>>,
}

impl MemoryPeer {
    /// Next raw frame from the client. `None` once the client dropped the link.
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Next decodable packet from the client, skipping frames that fail to decode.
    pub async fn recv(&mut self) -> Option<Packet> {
        loop {
            let frame = self.inbound.recv().await?;
            match Packet::decode(&frame) {
                Ok(packet) => return Some(packet),
                Err(e) => tracing::warn!("memory router dropped frame: {e}"),
            }
        }
    }

    /// Send a packet to the client. Returns false once the client is gone.
    pub fn send(&self, packet: &Packet) -> bool {
        match packet.encode() {
            Ok(frame) => self.send_raw(frame),
            Err(e) => {
                tracing::error!("Failed to serialize packet: {e}");
                false
            }
        }
    }

    /// Send an arbitrary text frame, well-formed or not.
    pub fn send_raw(&self, frame: impl Into<String>) -> bool {
        self.outbound.send(Ok(frame.into())).is_ok()
    }

    /// Fail the link with a transport error, as a dropped socket would.
    pub fn fail(self) {
        let _ = self.outbound.send(Err(TransportError::Closed));
    }

    /// Whether the client side still holds the link.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }
}
