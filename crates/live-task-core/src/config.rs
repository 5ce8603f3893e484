//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a live task client.
///
/// Passed by value into the client; nothing reads configuration from
/// shared state after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// WebSocket endpoint of the router.
    pub router_url: String,
    /// Interval between reachability probes while connected.
    pub heartbeat_interval_ms: u64,
    /// How long the router may leave a probe unanswered.
    pub router_timeout_ms: u64,
    /// Retry policy, applied to each hop independently.
    pub reconnect: ReconnectPolicy,
    /// Deadline for a remote call. `None` disables eviction.
    pub call_timeout_ms: Option<u64>,
    /// How often pending calls are checked against their deadline.
    pub sweep_interval_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            router_url: "ws://127.0.0.1:3000/socket".to_string(),
            heartbeat_interval_ms: 1_000,
            router_timeout_ms: 4_000,
            reconnect: ReconnectPolicy::default(),
            call_timeout_ms: Some(60_000),
            sweep_interval_ms: 1_000,
        }
    }
}

impl LiveConfig {
    /// Create a configuration for the given router endpoint.
    #[must_use]
    pub fn new(router_url: impl Into<String>) -> Self {
        Self {
            router_url: router_url.into(),
            ..Self::default()
        }
    }

    /// Set the reconnect policy.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the heartbeat interval and router timeout.
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval_ms = duration_ms(interval);
        self.router_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the remote call deadline; `None` keeps calls pending forever.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout_ms = timeout.map(duration_ms);
        self
    }

    /// Set how often pending calls are checked against their deadline.
    #[must_use]
    pub fn with_sweep_interval(mut self, every: Duration) -> Self {
        self.sweep_interval_ms = duration_ms(every);
        self
    }

    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    #[must_use]
    pub const fn router_timeout(&self) -> Duration {
        Duration::from_millis(self.router_timeout_ms)
    }

    #[must_use]
    pub const fn call_timeout(&self) -> Option<Duration> {
        match self.call_timeout_ms {
            Some(ms) => Some(Duration::from_millis(ms)),
            None => None,
        }
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Retries per hop before giving up.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (zero-based).
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = scaled.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis() as u64
}
