//! Status and message observers.

use live_task_core::{AgentStatus, ConnectionStatus, Message};

/// Receives client notifications in event order.
///
/// Implement this trait to drive a UI. Methods run on the task that
/// processed the event, outside the client's locks, so they may call
/// back into the client. Keep them short.
pub trait LiveObserver: Send + Sync {
    /// Coarse transport status changed.
    fn on_connection_status_change(&self, _status: ConnectionStatus) {}

    /// Server moved the agent to a new lifecycle status.
    fn on_agent_status_change(&self, _status: AgentStatus) {}

    /// A new message from a peer was appended to the log.
    fn on_message_received(&self, _message: &Message) {}

    /// The message log was cleared.
    fn on_messages_cleared(&self) {}
}
