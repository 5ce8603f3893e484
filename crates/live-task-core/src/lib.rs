//! Core types for live task sessions.
//!
//! This crate provides the building blocks shared by the transport and
//! the client:
//! - `LiveUpdate` - The wire envelope for messages, session updates and calls
//! - `Agent` - The worker's session lifecycle state machine
//! - `MessageLog` - Ordered, deduplicated conversation log with broadcast
//! - `LiveConfig` - Explicit configuration passed to the client
//! - `Transport` trait and `ConnectionStatus`

pub mod agent;
pub mod config;
pub mod live_update;
pub mod message_log;
pub mod traits;

pub use agent::{Agent, AgentStatus};
pub use config::{LiveConfig, ReconnectPolicy};
pub use live_update::{CallRequest, CallResponse, LiveUpdate, Message, MessagePacket, SessionState};
pub use message_log::{AppendOutcome, LogEvent, MessageLog};
pub use traits::{ConnectionStatus, Link, Transport, TransportError};
