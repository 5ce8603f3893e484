//! Agent session lifecycle.
//!
//! The server owns the lifecycle; this side only mirrors it. Transport
//! events never change an agent's status.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SessionState;

/// Status of a worker's session on a task unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Completing qualification steps before the task proper.
    Onboarding,
    /// Registered, no task data yet.
    #[default]
    Waiting,
    /// Actively working.
    InTask,
    /// Submitted successfully.
    Done,
    /// Worker disconnected for too long.
    Disconnect,
    /// Worker returned the task.
    Returned,
    /// Task unit expired.
    Expired,
    /// Worker ran out of time.
    Timeout,
    /// Another worker in a shared task left.
    PartnerDisconnect,
    /// Server severed the session.
    MephistoDisconnect,
}

impl AgentStatus {
    /// No further productive transition leaves a terminal status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Onboarding | Self::Waiting | Self::InTask)
    }

    /// Whether the session ended in something other than a submission.
    #[must_use]
    pub const fn is_abnormal(self) -> bool {
        self.is_terminal() && !matches!(self, Self::Done)
    }

    const fn progress(self) -> u8 {
        match self {
            Self::Onboarding => 0,
            Self::Waiting => 1,
            Self::InTask => 2,
            _ => 3,
        }
    }

    /// Transition table: forward through the active states, or into any
    /// terminal one. Terminal states absorb everything.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            return true;
        }
        next.progress() > self.progress()
    }
}

/// One worker's session, as last reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// Assigned by the server at registration.
    pub agent_id: Option<String>,
    /// `Waiting` until the server reports otherwise.
    pub status: AgentStatus,
    /// Whether the server has reported any status yet. The first report
    /// may set any status, `Onboarding` included.
    #[serde(default)]
    pub status_reported: bool,
    /// Describes the state the session ended in.
    pub task_done_payload: Option<Value>,
    /// Latest task data pushed with a session update.
    pub task_data: Option<Value>,
}

impl Agent {
    /// Create an agent that has not registered yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the server has acknowledged registration.
    #[must_use]
    pub const fn is_registered(&self) -> bool {
        self.agent_id.is_some()
    }

    /// Record the id acknowledged by the server.
    pub fn assign_id(&mut self, agent_id: &str) {
        match self.agent_id.as_deref() {
            Some(current) if current == agent_id => {}
            Some(current) => {
                tracing::warn!(current, assigned = agent_id, "server reassigned agent id");
                self.agent_id = Some(agent_id.to_string());
            }
            None => self.agent_id = Some(agent_id.to_string()),
        }
    }

    /// Apply a session update.
    ///
    /// Returns the new status when it changed. Payload fields are recorded
    /// even when the status transition is rejected, unless the agent is
    /// already terminal.
    pub fn apply(&mut self, state: SessionState) -> Option<AgentStatus> {
        if self.status.is_terminal() {
            tracing::debug!(status = ?self.status, "ignoring session update for terminal agent");
            return None;
        }

        if let Some(agent_id) = state.agent_id.as_deref() {
            self.assign_id(agent_id);
        }
        if state.task_data.is_some() {
            self.task_data = state.task_data;
        }
        if state.task_done_payload.is_some() {
            self.task_done_payload = state.task_done_payload;
        }

        let next = state.agent_status?;
        let first_report = !std::mem::replace(&mut self.status_reported, true);
        if next == self.status {
            return None;
        }
        if !first_report && !self.status.can_transition_to(next) {
            tracing::warn!(from = ?self.status, to = ?next, "rejected agent status transition");
            return None;
        }

        tracing::info!(from = ?self.status, to = ?next, "agent status changed");
        self.status = next;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn update(status: AgentStatus) -> SessionState {
        SessionState {
            agent_status: Some(status),
            ..SessionState::default()
        }
    }

    #[test]
    fn test_happy_path() {
        let mut agent = Agent::new();
        assert_eq!(agent.status, AgentStatus::Waiting);
        assert_eq!(agent.apply(update(AgentStatus::InTask)), Some(AgentStatus::InTask));
        assert_eq!(agent.apply(update(AgentStatus::Done)), Some(AgentStatus::Done));
        assert!(agent.status.is_terminal());
        assert!(!agent.status.is_abnormal());
    }

    #[test]
    fn test_onboarding_then_task() {
        let mut agent = Agent::new();
        assert_eq!(
            agent.apply(update(AgentStatus::Onboarding)),
            Some(AgentStatus::Onboarding)
        );
        assert_eq!(agent.status, AgentStatus::Onboarding);
        assert_eq!(agent.apply(update(AgentStatus::Waiting)), Some(AgentStatus::Waiting));
        assert_eq!(agent.apply(update(AgentStatus::InTask)), Some(AgentStatus::InTask));
        assert_eq!(agent.apply(update(AgentStatus::Onboarding)), None);
        assert_eq!(agent.status, AgentStatus::InTask);
    }

    #[test]
    fn test_waiting_report_closes_onboarding() {
        let mut agent = Agent::new();
        assert_eq!(agent.apply(update(AgentStatus::Waiting)), None);
        assert!(agent.status_reported);
        assert_eq!(agent.apply(update(AgentStatus::Onboarding)), None);
        assert_eq!(agent.status, AgentStatus::Waiting);
    }

    #[test]
    fn test_terminal_absorbs_updates() {
        let mut agent = Agent::new();
        agent.apply(update(AgentStatus::Expired));
        assert_eq!(agent.apply(update(AgentStatus::InTask)), None);
        assert_eq!(agent.apply(update(AgentStatus::Done)), None);
        assert_eq!(agent.status, AgentStatus::Expired);
    }

    #[test]
    fn test_abnormal_reachable_from_active_states() {
        for start in [AgentStatus::Onboarding, AgentStatus::Waiting, AgentStatus::InTask] {
            for end in [
                AgentStatus::Disconnect,
                AgentStatus::Returned,
                AgentStatus::Expired,
                AgentStatus::Timeout,
                AgentStatus::PartnerDisconnect,
                AgentStatus::MephistoDisconnect,
            ] {
                assert!(start.can_transition_to(end), "{start:?} -> {end:?}");
                assert!(end.is_abnormal());
            }
        }
    }

    #[test]
    fn test_no_regression() {
        let mut agent = Agent::new();
        agent.apply(update(AgentStatus::InTask));
        assert_eq!(agent.apply(update(AgentStatus::Waiting)), None);
        assert_eq!(agent.status, AgentStatus::InTask);
        assert_eq!(agent.apply(update(AgentStatus::InTask)), None);
    }

    #[test]
    fn test_payload_and_id_recorded() {
        let mut agent = Agent::new();
        let changed = agent.apply(SessionState {
            agent_status: Some(AgentStatus::Returned),
            agent_id: Some("a-1".into()),
            task_done_payload: Some(json!({ "reason": "returned" })),
            task_data: None,
        });
        assert_eq!(changed, Some(AgentStatus::Returned));
        assert_eq!(agent.agent_id.as_deref(), Some("a-1"));
        assert!(agent.is_registered());
        assert_eq!(agent.task_done_payload, Some(json!({ "reason": "returned" })));
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(AgentStatus::MephistoDisconnect).unwrap(),
            json!("mephisto_disconnect")
        );
        assert_eq!(
            serde_json::from_value::<AgentStatus>(json!("in_task")).unwrap(),
            AgentStatus::InTask
        );
    }
}
