//! Wire protocol between the client and the router.

use live_task_core::{LiveUpdate, TransportError};
use serde::{Deserialize, Serialize};

/// Protocol error.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ProtocolError> for TransportError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// One text frame on the link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "packet", rename_all = "snake_case")]
pub enum Packet {
    /// Client attaches its agent identity.
    Register {
        #[serde(rename = "agentId")]
        agent_id: String,
    },
    /// Server acknowledged registration.
    Registered {
        #[serde(rename = "agentId")]
        agent_id: String,
    },
    /// Reachability probe.
    Heartbeat,
    /// Router answer to a probe, with the state of the server hop.
    HeartbeatAck {
        #[serde(rename = "serverAlive")]
        server_alive: bool,
    },
    /// Live update payload.
    Update { update: LiveUpdate },
}

impl Packet {
    /// Wrap a live update.
    #[must_use]
    pub const fn update(update: LiveUpdate) -> Self {
        Self::Update { update }
    }

    /// Encode as a JSON text frame.
    ///
    /// # Errors
    /// Returns error if a payload value fails to serialize.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON text frame.
    ///
    /// # Errors
    /// Returns error if the frame is not a valid packet.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }
}

#[cfg(test)]
mod tests {
    use live_task_core::{CallResponse, MessagePacket};
    use serde_json::{Value, json};

    use super::*;

    #[test]
    fn test_control_packet_shape() {
        let frame = Packet::HeartbeatAck { server_alive: false }.encode().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({ "packet": "heartbeat_ack", "serverAlive": false }));

        let parsed = Packet::decode(r#"{"packet":"heartbeat"}"#).unwrap();
        assert_eq!(parsed, Packet::Heartbeat);
    }

    #[test]
    fn test_update_nests_envelope() {
        let packet = Packet::update(LiveUpdate::CallResponse(CallResponse {
            sender_id: None,
            handles: "req-1".into(),
            response: "42".into(),
        }));
        let value: Value = serde_json::from_str(&packet.encode().unwrap()).unwrap();
        assert_eq!(value["packet"], "update");
        assert_eq!(value["update"]["kind"], "call-response");
        assert_eq!(value["update"]["handles"], "req-1");
    }

    #[test]
    fn test_message_update_decodes() {
        let packet = Packet::decode(
            r#"{"packet":"update","update":{"kind":"message","id":"m1","senderId":"s","text":"hi"}}"#,
        )
        .unwrap();
        assert_eq!(
            packet,
            Packet::update(LiveUpdate::Message(MessagePacket {
                id: "m1".into(),
                sender_id: Some("s".into()),
                text: "hi".into(),
                task_data: None,
                episode_done: false,
            }))
        );
    }

    #[test]
    fn test_malformed_frames_error() {
        assert!(Packet::decode("not json").is_err());
        assert!(Packet::decode(r#"{"packet":"update","update":{"kind":"call-response"}}"#).is_err());
        let err: TransportError = Packet::decode("{").unwrap_err().into();
        assert!(matches!(err, TransportError::Protocol(_)));
    }
}
