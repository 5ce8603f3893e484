//! Ordered, deduplicated conversation log with broadcast.

use std::{
    collections::HashSet,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::Message;

/// Capacity of the live event channel.
const EVENT_CAPACITY: usize = 1024;

/// Change to the log, delivered to live subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    Appended(Message),
    Cleared,
}

/// Result of an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Stored at the end of the log.
    Appended,
    /// Empty text is noise and never stored.
    EmptyText,
    /// An entry with this id already exists; the log is unchanged.
    Duplicate,
}

impl AppendOutcome {
    #[must_use]
    pub const fn is_appended(self) -> bool {
        matches!(self, Self::Appended)
    }
}

#[derive(Default)]
struct Inner {
    entries: Vec<Message>,
    ids: HashSet<String>,
}

/// Append-only message log in arrival order.
///
/// New subscribers can replay history and then follow live events.
pub struct MessageLog {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<LogEvent>,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            sender,
        }
    }

    /// Append a message unless its text is empty or its id is known.
    pub fn append(&self, message: Message) -> AppendOutcome {
        if message.text.is_empty() {
            tracing::debug!(id = %message.id, "dropping message with empty text");
            return AppendOutcome::EmptyText;
        }

        {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            if !inner.ids.insert(message.id.clone()) {
                tracing::debug!(id = %message.id, "duplicate message ignored");
                return AppendOutcome::Duplicate;
            }
            inner.entries.push(message.clone());
        }

        let _ = self.sender.send(LogEvent::Appended(message));
        AppendOutcome::Appended
    }

    /// Atomically empty the log.
    pub fn clear(&self) {
        {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            inner.entries.clear();
            inner.ids.clear();
        }
        let _ = self.sender.send(LogEvent::Cleared);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a message with this id is stored.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ids
            .contains(id)
    }

    /// Snapshot of the log in arrival order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clone()
    }

    /// Receiver for live events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.sender.subscribe()
    }

    /// Stream that yields the current history, then live events.
    ///
    /// Subscribes before taking the snapshot; an append racing the call may
    /// be yielded twice, so consumers dedup by message id.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, LogEvent> {
        let rx = self.subscribe();
        let history = self.snapshot();

        let hist = futures::stream::iter(history.into_iter().map(LogEvent::Appended));
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }
}
