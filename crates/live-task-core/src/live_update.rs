//! The live update envelope and the conversational message type.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AgentStatus;

/// Unit exchanged between the client and the server over the relay.
///
/// Matched exhaustively by receivers; every kind has exactly one handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum LiveUpdate {
    /// Human-visible conversational message.
    Message(MessagePacket),
    /// Session lifecycle change, owned by the server.
    SessionUpdate {
        #[serde(rename = "sessionState")]
        session_state: SessionState,
    },
    /// Remote call issued by a peer.
    CallRequest(CallRequest),
    /// Answer to a previously issued call.
    CallResponse(CallResponse),
}

impl LiveUpdate {
    /// Wire name of this update's kind, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::SessionUpdate { .. } => "session-update",
            Self::CallRequest(_) => "call-request",
            Self::CallResponse(_) => "call-response",
        }
    }
}

/// Message as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePacket {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_data: Option<Value>,
    /// Set by the sender when this message ends its turn or the task.
    #[serde(default)]
    pub episode_done: bool,
}

/// Session state pushed by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_status: Option<AgentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_done_payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_data: Option<Value>,
}

/// Outbound remote call. `args` is JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    pub request_id: String,
    pub target: String,
    pub args: String,
}

/// Response to a call. `handles` equals the originating `request_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    pub handles: String,
    pub response: String,
}

/// One entry of the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique per message; the dedup key.
    pub id: String,
    pub sender_id: Option<String>,
    pub text: String,
    pub task_data: Option<Value>,
    pub episode_done: bool,
    /// Local arrival time (Unix epoch milliseconds).
    pub received_at: i64,
}

impl Message {
    /// Stamp an inbound packet with the local arrival time.
    #[must_use]
    pub fn received(packet: MessagePacket) -> Self {
        Self {
            id: packet.id,
            sender_id: packet.sender_id,
            text: packet.text,
            task_data: packet.task_data,
            episode_done: packet.episode_done,
            received_at: now_millis(),
        }
    }

    /// Wire form of this message.
    #[must_use]
    pub fn to_packet(&self) -> MessagePacket {
        MessagePacket {
            id: self.id.clone(),
            sender_id: self.sender_id.clone(),
            text: self.text.clone(),
            task_data: self.task_data.clone(),
            episode_done: self.episode_done,
        }
    }
}

/// Current Unix time in milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
