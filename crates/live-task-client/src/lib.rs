//! Client side of a live task session.
//!
//! Provides:
//! - `LiveTaskClient` - Connection lifecycle, messaging and remote calls
//! - `ConnectionMachine` - Two-hop reachability state machine
//! - `Correlator` - Pending remote calls keyed by request id
//! - `LiveObserver` - Notification hooks for UIs

pub mod client;
pub mod connection;
pub mod correlator;
mod driver;
pub mod observer;

pub use client::{ClientError, LiveTaskClient, OutgoingMessage, SendError};
pub use connection::{ConnectionMachine, Hop, HopEvent, Transition};
pub use correlator::{
    CallCallback, CallError, CallFailure, CallOutcome, Correlator, PendingCall, Resolution,
};
pub use live_task_core::{
    Agent, AgentStatus, ConnectionStatus, LiveConfig, Message, MessageLog, ReconnectPolicy,
};
pub use observer::LiveObserver;
