//! Echo backend: answers client packets the way a router in front of a
//! trivial server would.

use live_task_core::{
    AgentStatus, CallResponse, LiveUpdate, MessagePacket, SessionState,
};
use serde_json::json;
use uuid::Uuid;

use crate::Packet;

/// Sender id used for everything the echo backend originates.
pub const ECHO_SENDER: &str = "echo-server";

/// Stateless-per-link echo backend with a switchable server hop.
#[derive(Debug, Clone)]
pub struct EchoServer {
    server_alive: bool,
}

impl Default for EchoServer {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoServer {
    #[must_use]
    pub const fn new() -> Self {
        Self { server_alive: true }
    }

    /// Simulate the backend going away or coming back.
    pub const fn set_server_alive(&mut self, alive: bool) {
        self.server_alive = alive;
    }

    #[must_use]
    pub const fn server_alive(&self) -> bool {
        self.server_alive
    }

    /// Packets to send back for one client packet.
    ///
    /// With the server hop down only heartbeats are answered; everything
    /// else is swallowed by the router.
    #[must_use]
    pub fn respond(&self, packet: Packet) -> Vec<Packet> {
        match packet {
            Packet::Heartbeat => vec![Packet::HeartbeatAck {
                server_alive: self.server_alive,
            }],
            _ if !self.server_alive => Vec::new(),
            Packet::Register { agent_id } => vec![
                Packet::Registered {
                    agent_id: agent_id.clone(),
                },
                Packet::update(LiveUpdate::SessionUpdate {
                    session_state: SessionState {
                        agent_status: Some(AgentStatus::InTask),
                        agent_id: Some(agent_id),
                        task_done_payload: None,
                        task_data: Some(json!({ "task": "echo" })),
                    },
                }),
            ],
            Packet::Update {
                update: LiveUpdate::CallRequest(request),
            } => vec![Packet::update(LiveUpdate::CallResponse(CallResponse {
                sender_id: Some(ECHO_SENDER.to_string()),
                handles: request.request_id,
                response: request.args,
            }))],
            Packet::Update {
                update: LiveUpdate::Message(message),
            } if !message.text.is_empty() => {
                vec![Packet::update(LiveUpdate::Message(MessagePacket {
                    id: Uuid::new_v4().to_string(),
                    sender_id: Some(ECHO_SENDER.to_string()),
                    text: message.text,
                    task_data: message.task_data,
                    episode_done: false,
                }))]
            }
            Packet::Update { .. } | Packet::Registered { .. } | Packet::HeartbeatAck { .. } => {
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use live_task_core::CallRequest;

    use super::*;

    #[test]
    fn test_call_is_echoed_with_same_id() {
        let server = EchoServer::new();
        let replies = server.respond(Packet::update(LiveUpdate::CallRequest(CallRequest {
            sender_id: Some("a".into()),
            request_id: "r-1".into(),
            target: "echo".into(),
            args: r#"{"x":1}"#.into(),
        })));
        assert_eq!(replies.len(), 1);
        let Packet::Update {
            update: LiveUpdate::CallResponse(resp),
        } = &replies[0]
        else {
            panic!("expected call response");
        };
        assert_eq!(resp.handles, "r-1");
        assert_eq!(resp.response, r#"{"x":1}"#);
    }

    #[test]
    fn test_server_down_only_answers_heartbeats() {
        let mut server = EchoServer::new();
        server.set_server_alive(false);

        assert_eq!(
            server.respond(Packet::Heartbeat),
            vec![Packet::HeartbeatAck { server_alive: false }]
        );
        assert!(server
            .respond(Packet::Register {
                agent_id: "a".into()
            })
            .is_empty());
    }

    #[test]
    fn test_register_acknowledged() {
        let replies = EchoServer::new().respond(Packet::Register {
            agent_id: "a-7".into(),
        });
        assert_eq!(
            replies[0],
            Packet::Registered {
                agent_id: "a-7".into()
            }
        );
        assert!(matches!(
            replies[1],
            Packet::Update {
                update: LiveUpdate::SessionUpdate { .. }
            }
        ));
    }
}
