//! Connection state machine.
//!
//! Pure transition table over hop events; the link driver feeds it and
//! acts on the retry delays it hands back.

use std::time::Duration;

use live_task_core::{ConnectionStatus, ReconnectPolicy};
use tokio::time::Instant;

/// One of the two independently failing hops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hop {
    /// Client to relay.
    Router,
    /// Relay to backend.
    Server,
}

impl Hop {
    const fn reconnecting(self) -> ConnectionStatus {
        match self {
            Self::Router => ConnectionStatus::ReconnectingRouter,
            Self::Server => ConnectionStatus::ReconnectingServer,
        }
    }

    const fn disconnected(self) -> ConnectionStatus {
        match self {
            Self::Router => ConnectionStatus::DisconnectedRouter,
            Self::Server => ConnectionStatus::DisconnectedServer,
        }
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopEvent {
    /// `connect()` was called.
    Started,
    /// A link to the router opened; registration still pending.
    LinkOpened,
    /// The server acknowledged registration.
    HandshakeComplete,
    /// Link failed to open, ended, or stopped answering probes.
    RouterLost,
    /// Router reports the server unreachable.
    ServerLost,
    /// `destroy()` was called.
    Destroyed,
}

/// Outcome of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionStatus,
    pub to: ConnectionStatus,
    /// Set when a retry was scheduled for the lost hop.
    pub retry_in: Option<Duration>,
}

impl Transition {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Reachability of router and server, with per-hop retry budgets.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    status: ConnectionStatus,
    policy: ReconnectPolicy,
    router_attempts: u32,
    server_attempts: u32,
    backoff_deadline: Option<Instant>,
}

impl ConnectionMachine {
    #[must_use]
    pub const fn new(policy: ReconnectPolicy) -> Self {
        Self {
            status: ConnectionStatus::NotStarted,
            policy,
            router_attempts: 0,
            server_attempts: 0,
            backoff_deadline: None,
        }
    }

    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Retries scheduled for the hop since the last successful handshake.
    #[must_use]
    pub const fn retry_count(&self, hop: Hop) -> u32 {
        match hop {
            Hop::Router => self.router_attempts,
            Hop::Server => self.server_attempts,
        }
    }

    /// When the next scheduled retry is due.
    #[must_use]
    pub const fn backoff_deadline(&self) -> Option<Instant> {
        self.backoff_deadline
    }

    /// Apply one event.
    pub fn apply(&mut self, event: HopEvent, now: Instant) -> Transition {
        use ConnectionStatus as S;

        let from = self.status;
        let mut retry_in = None;

        match (event, from) {
            (HopEvent::Destroyed, _) => {
                self.reset_budgets();
                self.status = S::NotStarted;
            }
            // Terminal states only leave through destroy.
            (_, S::DisconnectedRouter | S::DisconnectedServer) => {}
            (HopEvent::Started, S::NotStarted) => self.status = S::Connecting,
            (HopEvent::Started, _) | (_, S::NotStarted) => {}
            (HopEvent::LinkOpened, S::ReconnectingRouter) => self.status = S::Connecting,
            (HopEvent::LinkOpened, _) => {}
            (HopEvent::HandshakeComplete, _) => {
                self.reset_budgets();
                self.status = S::Connected;
            }
            (HopEvent::RouterLost, _) => retry_in = self.schedule(Hop::Router, now),
            // Without a router there is no news about the server.
            (HopEvent::ServerLost, S::ReconnectingRouter) => {}
            (HopEvent::ServerLost, _) => retry_in = self.schedule(Hop::Server, now),
        }

        if from != self.status {
            tracing::info!(from = ?from, to = ?self.status, "connection status changed");
        }

        Transition {
            from,
            to: self.status,
            retry_in,
        }
    }

    fn schedule(&mut self, hop: Hop, now: Instant) -> Option<Duration> {
        let attempts = match hop {
            Hop::Router => &mut self.router_attempts,
            Hop::Server => &mut self.server_attempts,
        };

        if *attempts >= self.policy.max_attempts {
            tracing::warn!(?hop, attempts = *attempts, "retries exhausted");
            self.status = hop.disconnected();
            self.backoff_deadline = None;
            return None;
        }

        let delay = self.policy.delay(*attempts);
        *attempts += 1;
        self.status = hop.reconnecting();
        self.backoff_deadline = Some(now + delay);
        Some(delay)
    }

    const fn reset_budgets(&mut self) {
        self.router_attempts = 0;
        self.server_attempts = 0;
        self.backoff_deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(max_attempts: u32) -> ConnectionMachine {
        ConnectionMachine::new(ReconnectPolicy {
            max_attempts,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
        })
    }

    fn connected(max_attempts: u32) -> ConnectionMachine {
        let mut m = machine(max_attempts);
        let now = Instant::now();
        m.apply(HopEvent::Started, now);
        m.apply(HopEvent::LinkOpened, now);
        m.apply(HopEvent::HandshakeComplete, now);
        assert_eq!(m.status(), ConnectionStatus::Connected);
        m
    }

    #[test]
    fn test_start_and_handshake() {
        let mut m = machine(3);
        let now = Instant::now();
        assert_eq!(m.status(), ConnectionStatus::NotStarted);

        let t = m.apply(HopEvent::Started, now);
        assert!(t.changed());
        assert_eq!(t.to, ConnectionStatus::Connecting);

        assert!(!m.apply(HopEvent::Started, now).changed());
        assert_eq!(
            m.apply(HopEvent::HandshakeComplete, now).to,
            ConnectionStatus::Connected
        );
    }

    #[test]
    fn test_events_before_start_ignored() {
        let mut m = machine(3);
        let now = Instant::now();
        for event in [HopEvent::RouterLost, HopEvent::ServerLost, HopEvent::HandshakeComplete] {
            assert!(!m.apply(event, now).changed());
        }
        assert_eq!(m.status(), ConnectionStatus::NotStarted);
    }

    #[test]
    fn test_router_outage_exhausts() {
        let mut m = connected(3);
        let now = Instant::now();
        let mut seen = Vec::new();

        let t = m.apply(HopEvent::RouterLost, now);
        assert_eq!(t.to, ConnectionStatus::ReconnectingRouter);
        assert_eq!(t.retry_in, Some(Duration::from_millis(100)));
        assert_eq!(m.backoff_deadline(), Some(now + Duration::from_millis(100)));
        seen.push(t.to);

        let t = m.apply(HopEvent::RouterLost, now);
        assert_eq!(t.retry_in, Some(Duration::from_millis(200)));
        seen.push(t.to);
        let t = m.apply(HopEvent::RouterLost, now);
        assert_eq!(t.retry_in, Some(Duration::from_millis(400)));
        seen.push(t.to);
        assert_eq!(m.retry_count(Hop::Router), 3);

        let t = m.apply(HopEvent::RouterLost, now);
        assert_eq!(t.to, ConnectionStatus::DisconnectedRouter);
        assert_eq!(t.retry_in, None);
        seen.push(t.to);

        assert!(!seen.contains(&ConnectionStatus::ReconnectingServer));
        assert!(!seen.contains(&ConnectionStatus::DisconnectedServer));
    }

    #[test]
    fn test_server_loss_ignored_while_router_down() {
        let mut m = connected(3);
        let now = Instant::now();
        m.apply(HopEvent::RouterLost, now);
        let t = m.apply(HopEvent::ServerLost, now);
        assert!(!t.changed());
        assert_eq!(m.retry_count(Hop::Server), 0);
    }

    #[test]
    fn test_server_outage_exhausts() {
        let mut m = connected(2);
        let now = Instant::now();

        assert_eq!(
            m.apply(HopEvent::ServerLost, now).to,
            ConnectionStatus::ReconnectingServer
        );
        assert_eq!(
            m.apply(HopEvent::ServerLost, now).to,
            ConnectionStatus::ReconnectingServer
        );
        assert_eq!(
            m.apply(HopEvent::ServerLost, now).to,
            ConnectionStatus::DisconnectedServer
        );
        assert_eq!(m.retry_count(Hop::Router), 0);
    }

    #[test]
    fn test_recovery_resets_budget() {
        let mut m = connected(2);
        let now = Instant::now();
        m.apply(HopEvent::RouterLost, now);
        m.apply(HopEvent::RouterLost, now);
        m.apply(HopEvent::LinkOpened, now);
        assert_eq!(m.status(), ConnectionStatus::Connecting);
        m.apply(HopEvent::HandshakeComplete, now);
        assert_eq!(m.retry_count(Hop::Router), 0);

        let t = m.apply(HopEvent::RouterLost, now);
        assert_eq!(t.retry_in, Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_terminal_until_destroyed() {
        let mut m = connected(0);
        let now = Instant::now();
        assert_eq!(
            m.apply(HopEvent::RouterLost, now).to,
            ConnectionStatus::DisconnectedRouter
        );
        for event in [
            HopEvent::Started,
            HopEvent::LinkOpened,
            HopEvent::HandshakeComplete,
            HopEvent::ServerLost,
        ] {
            assert!(!m.apply(event, now).changed());
        }
        assert_eq!(
            m.apply(HopEvent::Destroyed, now).to,
            ConnectionStatus::NotStarted
        );
    }
}
