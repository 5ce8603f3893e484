//! Link driver: owns the transport, probes both hops, and reconnects.

use std::{sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use live_task_core::{ConnectionStatus, Link, Transport, TransportError, traits::FrameSink};
use live_task_transport::Packet;
use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior},
};

use crate::{client::Shared, connection::HopEvent};

/// Why a link stopped being served.
enum LinkEnd {
    /// The router hop failed; reconnect with backoff.
    RouterLost,
    /// The server hop ran out of retries; stop.
    ServerExhausted,
}

/// Background task behind one client.
pub(crate) struct LinkDriver {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl LinkDriver {
    pub(crate) fn new(
        shared: Arc<Shared>,
        transport: Arc<dyn Transport>,
        outbound: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            shared,
            transport,
            outbound,
        }
    }

    /// Open links until a hop exhausts its retries.
    pub(crate) async fn run(mut self) {
        let open_timeout = self.shared.config().router_timeout();

        loop {
            match tokio::time::timeout(open_timeout, self.transport.open()).await {
                Ok(Ok(link)) => {
                    tracing::info!("link to router open");
                    self.shared.apply_hop(HopEvent::LinkOpened);
                    match self.serve(link).await {
                        LinkEnd::RouterLost => {}
                        LinkEnd::ServerExhausted => {
                            tracing::warn!("server unreachable, giving up");
                            return;
                        }
                    }
                }
                Ok(Err(e)) => tracing::warn!("router unreachable: {e}"),
                Err(_) => tracing::warn!("opening link to router timed out"),
            }

            let transition = self.shared.apply_hop(HopEvent::RouterLost);
            let Some(delay) = transition.retry_in else {
                tracing::warn!(status = ?transition.to, "link driver stopping");
                return;
            };
            tracing::info!(?delay, "reconnecting to router");
            tokio::time::sleep(delay).await;
        }
    }

    async fn serve(&mut self, link: Link) -> LinkEnd {
        let Link {
            mut sink,
            mut stream,
        } = link;
        let heartbeat_interval = self.shared.config().heartbeat_interval();
        let router_timeout = self.shared.config().router_timeout();

        if self.register(&mut sink).await.is_err() {
            return LinkEnd::RouterLost;
        }

        let mut probe_due = Instant::now() + heartbeat_interval;
        let mut awaiting_ack: Option<Instant> = None;

        loop {
            let wake = awaiting_ack.map_or(probe_due, |sent| sent + router_timeout);

            tokio::select! {
                frame = stream.next() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => {
                            tracing::warn!("link to router failed: {e}");
                            return LinkEnd::RouterLost;
                        }
                        None => {
                            tracing::warn!("router closed the link");
                            return LinkEnd::RouterLost;
                        }
                    };
                    let packet = match Packet::decode(&frame) {
                        Ok(packet) => packet,
                        Err(e) => {
                            tracing::warn!("dropping malformed packet: {e}");
                            continue;
                        }
                    };

                    match packet {
                        Packet::Registered { agent_id } => self.shared.on_registered(&agent_id),
                        Packet::HeartbeatAck { server_alive: true } => {
                            awaiting_ack = None;
                            probe_due = Instant::now() + heartbeat_interval;
                            if self.shared.status() == ConnectionStatus::ReconnectingServer {
                                tracing::info!("server reachable again, re-registering");
                                if self.register(&mut sink).await.is_err() {
                                    return LinkEnd::RouterLost;
                                }
                            }
                        }
                        Packet::HeartbeatAck { server_alive: false } => {
                            awaiting_ack = None;
                            let transition = self.shared.apply_hop(HopEvent::ServerLost);
                            if transition.to == ConnectionStatus::DisconnectedServer {
                                return LinkEnd::ServerExhausted;
                            }
                            probe_due = Instant::now() + transition.retry_in.unwrap_or(heartbeat_interval);
                        }
                        Packet::Update { update } => {
                            tracing::trace!(kind = update.kind(), "live update");
                            self.shared.dispatch(update);
                        }
                        Packet::Register { .. } | Packet::Heartbeat => {
                            tracing::debug!("ignoring client-bound packet from router");
                        }
                    }
                }
                Some(frame) = self.outbound.recv() => {
                    if let Err(e) = sink.send(frame).await {
                        tracing::warn!("failed to write to router: {e}");
                        return LinkEnd::RouterLost;
                    }
                }
                () = tokio::time::sleep_until(wake) => {
                    let now = Instant::now();
                    match awaiting_ack {
                        Some(sent) if now.duration_since(sent) >= router_timeout => {
                            tracing::warn!("router stopped answering heartbeats");
                            return LinkEnd::RouterLost;
                        }
                        Some(_) => {}
                        None if now >= probe_due => {
                            if send_packet(&mut sink, &Packet::Heartbeat).await.is_err() {
                                return LinkEnd::RouterLost;
                            }
                            awaiting_ack = Some(now);
                        }
                        None => {}
                    }
                }
            }
        }
    }

    async fn register(&self, sink: &mut FrameSink) -> Result<(), TransportError> {
        let Some(agent_id) = self.shared.identity() else {
            tracing::error!("no agent identity to register with");
            return Err(TransportError::Protocol("no agent identity".to_string()));
        };
        send_packet(sink, &Packet::Register { agent_id }).await
    }
}

async fn send_packet(sink: &mut FrameSink, packet: &Packet) -> Result<(), TransportError> {
    let frame = packet.encode().inspect_err(|e| {
        tracing::error!("Failed to serialize packet: {e}");
    })?;
    sink.send(frame).await.inspect_err(|e| {
        tracing::warn!("failed to write to router: {e}");
    })
}

/// Periodically evict calls past their deadline.
pub(crate) async fn sweep_calls(shared: Arc<Shared>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        shared.sweep();
    }
}

#[cfg(test)]
mod tests {
    use live_task_core::LiveConfig;
    use live_task_transport::MemoryTransport;

    use super::*;

    #[tokio::test]
    async fn test_register_without_identity_is_an_error() {
        let (transport, mut router) = MemoryTransport::pair();
        let (_outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let driver = LinkDriver::new(
            Arc::new(Shared::new(LiveConfig::default())),
            Arc::new(transport.clone()),
            outbound_rx,
        );

        let mut link = transport.open().await.unwrap();
        let _peer = router.accept().await.unwrap();
        let result = driver.register(&mut link.sink).await;
        assert!(matches!(result, Err(TransportError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_send_on_dropped_link_is_an_error() {
        let (transport, mut router) = MemoryTransport::pair();
        let mut link = transport.open().await.unwrap();
        drop(router.accept().await.unwrap());

        let result = send_packet(&mut link.sink, &Packet::Heartbeat).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
