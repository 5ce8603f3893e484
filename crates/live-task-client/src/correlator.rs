//! Remote call correlation.
//!
//! Tracks calls that departed and pairs each with the response that
//! names it in `handles`. Responses may arrive in any order, more than
//! once, or never.

use std::{collections::HashMap, fmt, time::Duration};

use live_task_core::{CallRequest, CallResponse, ConnectionStatus};
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

/// Call could not be issued.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("Not connected (status: {0:?})")]
    NotConnected(ConnectionStatus),
    #[error("Failed to serialize call arguments: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Call failed: {0}")]
    Failed(#[from] CallFailure),
}

/// Call departed but will never be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CallFailure {
    #[error("Call timed out")]
    TimedOut,
    #[error("Connection destroyed before a response arrived")]
    Dropped,
}

/// Delivered to the callback of a finished call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub request_id: String,
    pub target: String,
    /// Arguments as issued.
    pub args: Value,
    pub response: Result<Value, CallFailure>,
}

/// Invoked at most once per call.
pub type CallCallback = Box<dyn FnOnce(CallOutcome) + Send + 'static>;

/// One outstanding call.
pub struct PendingCall {
    pub request_id: String,
    pub target: String,
    pub args: Value,
    pub created_at: Instant,
    pub deadline: Option<Instant>,
    callback: Option<CallCallback>,
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("request_id", &self.request_id)
            .field("target", &self.target)
            .field("created_at", &self.created_at)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl PendingCall {
    /// Hand the outcome to the callback, if one was registered.
    ///
    /// Must run outside any lock the callback might need.
    pub fn complete(self, response: Result<Value, CallFailure>) {
        if let Some(callback) = self.callback {
            callback(CallOutcome {
                request_id: self.request_id,
                target: self.target,
                args: self.args,
                response,
            });
        }
    }
}

/// What an inbound response did to the table.
#[derive(Debug)]
pub enum Resolution {
    /// Matched and removed; the caller completes it.
    Resolved(PendingCall, Value),
    /// Duplicate, late, or never issued here.
    Unmatched,
    /// Matched an entry but the payload did not parse; entry kept.
    Malformed(serde_json::Error),
}

/// Pending-call table keyed by request id.
pub struct Correlator {
    pending: HashMap<String, PendingCall>,
    timeout: Option<Duration>,
}

impl Correlator {
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            pending: HashMap::new(),
            timeout,
        }
    }

    /// Build the wire request for a new call with a fresh id.
    ///
    /// Nothing is registered yet; see [`Correlator::register`].
    ///
    /// # Errors
    /// Returns error if `args` cannot be encoded as JSON text.
    pub fn prepare(
        &self,
        sender_id: Option<&str>,
        target: &str,
        args: &Value,
    ) -> Result<CallRequest, CallError> {
        let args = serde_json::to_string(args)?;
        let mut request_id = Uuid::new_v4().to_string();
        while self.pending.contains_key(&request_id) {
            request_id = Uuid::new_v4().to_string();
        }
        Ok(CallRequest {
            sender_id: sender_id.map(str::to_string),
            request_id,
            target: target.to_string(),
            args,
        })
    }

    /// Record a call whose request the transport accepted.
    pub fn register(
        &mut self,
        request: &CallRequest,
        args: Value,
        callback: Option<CallCallback>,
        now: Instant,
    ) {
        let call = PendingCall {
            request_id: request.request_id.clone(),
            target: request.target.clone(),
            args,
            created_at: now,
            deadline: self.timeout.map(|timeout| now + timeout),
            callback,
        };
        if self.pending.insert(call.request_id.clone(), call).is_some() {
            tracing::error!(request_id = %request.request_id, "request id registered twice");
        }
    }

    /// Match a response against the table.
    pub fn resolve(&mut self, response: &CallResponse) -> Resolution {
        if !self.pending.contains_key(&response.handles) {
            tracing::debug!(handles = %response.handles, "dropping unmatched call response");
            return Resolution::Unmatched;
        }

        let value = match serde_json::from_str::<Value>(&response.response) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(handles = %response.handles, "dropping malformed call response: {e}");
                return Resolution::Malformed(e);
            }
        };

        match self.pending.remove(&response.handles) {
            Some(call) => Resolution::Resolved(call, value),
            None => Resolution::Unmatched,
        }
    }

    /// Remove every call whose deadline passed.
    pub fn sweep(&mut self, now: Instant) -> Vec<PendingCall> {
        let expired: Vec<String> = self
            .pending
            .values()
            .filter(|call| call.deadline.is_some_and(|deadline| deadline <= now))
            .map(|call| call.request_id.clone())
            .collect();

        let evicted: Vec<PendingCall> = expired
            .iter()
            .filter_map(|id| self.pending.remove(id))
            .collect();
        if !evicted.is_empty() {
            tracing::warn!(count = evicted.len(), "evicted timed out calls");
        }
        evicted
    }

    /// Forget every call without completing it.
    pub fn clear(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn contains(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{Arc, Mutex},
    };

    use serde_json::json;

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<CallOutcome>>>, CallCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (
            seen,
            Box::new(move |outcome| sink.lock().unwrap().push(outcome)),
        )
    }

    fn response(handles: &str, body: &str) -> CallResponse {
        CallResponse {
            sender_id: None,
            handles: handles.to_string(),
            response: body.to_string(),
        }
    }

    #[test]
    fn test_request_ids_unique() {
        let mut correlator = Correlator::new(None);
        let now = Instant::now();
        let mut ids = HashSet::new();
        for _ in 0..500 {
            let request = correlator.prepare(None, "noop", &json!(null)).unwrap();
            correlator.register(&request, json!(null), None, now);
            assert!(ids.insert(request.request_id));
        }
        assert_eq!(correlator.len(), 500);
    }

    #[test]
    fn test_prepare_does_not_register() {
        let correlator = Correlator::new(None);
        let request = correlator.prepare(Some("a-1"), "echo", &json!({ "x": 1 })).unwrap();
        assert_eq!(request.args, r#"{"x":1}"#);
        assert_eq!(request.sender_id.as_deref(), Some("a-1"));
        assert!(correlator.is_empty());
    }

    #[test]
    fn test_resolves_at_most_once() {
        let mut correlator = Correlator::new(None);
        let (seen, callback) = recorder();
        let request = correlator.prepare(None, "echo", &json!({ "x": 1 })).unwrap();
        correlator.register(&request, json!({ "x": 1 }), Some(callback), Instant::now());

        let reply = response(&request.request_id, r#"{"x":1}"#);
        match correlator.resolve(&reply) {
            Resolution::Resolved(call, value) => call.complete(Ok(value)),
            other => panic!("expected resolution, got {other:?}"),
        }
        assert!(matches!(correlator.resolve(&reply), Resolution::Unmatched));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].args, json!({ "x": 1 }));
        assert_eq!(seen[0].response, Ok(json!({ "x": 1 })));
        assert_eq!(seen[0].target, "echo");
    }

    #[test]
    fn test_out_of_order_responses() {
        let mut correlator = Correlator::new(None);
        let now = Instant::now();
        let first = correlator.prepare(None, "a", &json!(1)).unwrap();
        correlator.register(&first, json!(1), None, now);
        let second = correlator.prepare(None, "b", &json!(2)).unwrap();
        correlator.register(&second, json!(2), None, now);

        let Resolution::Resolved(call, _) = correlator.resolve(&response(&second.request_id, "2"))
        else {
            panic!("second should resolve");
        };
        assert_eq!(call.target, "b");
        assert!(correlator.contains(&first.request_id));
        assert!(!correlator.contains(&second.request_id));
    }

    #[test]
    fn test_malformed_response_keeps_entry() {
        let mut correlator = Correlator::new(None);
        let request = correlator.prepare(None, "echo", &json!(1)).unwrap();
        correlator.register(&request, json!(1), None, Instant::now());

        let outcome = correlator.resolve(&response(&request.request_id, "{not json"));
        assert!(matches!(outcome, Resolution::Malformed(_)));
        assert!(correlator.contains(&request.request_id));

        let outcome = correlator.resolve(&response(&request.request_id, "1"));
        assert!(matches!(outcome, Resolution::Resolved(_, _)));
    }

    #[test]
    fn test_sweep_evicts_expired_only() {
        let mut correlator = Correlator::new(Some(Duration::from_secs(5)));
        let start = Instant::now();
        let (seen, callback) = recorder();

        let old = correlator.prepare(None, "slow", &json!(null)).unwrap();
        correlator.register(&old, json!(null), Some(callback), start);
        let fresh = correlator.prepare(None, "fast", &json!(null)).unwrap();
        correlator.register(&fresh, json!(null), None, start + Duration::from_secs(3));

        assert!(correlator.sweep(start + Duration::from_secs(4)).is_empty());

        let evicted = correlator.sweep(start + Duration::from_secs(5));
        assert_eq!(evicted.len(), 1);
        for call in evicted {
            call.complete(Err(CallFailure::TimedOut));
        }
        assert_eq!(seen.lock().unwrap()[0].response, Err(CallFailure::TimedOut));
        assert!(correlator.contains(&fresh.request_id));

        let late = correlator.resolve(&response(&old.request_id, "null"));
        assert!(matches!(late, Resolution::Unmatched));
    }

    #[test]
    fn test_no_timeout_never_sweeps() {
        let mut correlator = Correlator::new(None);
        let now = Instant::now();
        let request = correlator.prepare(None, "wait", &json!(null)).unwrap();
        correlator.register(&request, json!(null), None, now);
        assert!(correlator.sweep(now + Duration::from_secs(86_400)).is_empty());
        assert_eq!(correlator.clear(), 1);
        assert!(correlator.is_empty());
    }
}
