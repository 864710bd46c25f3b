//! Domain events and the in-process event bus.
//!
//! Events are emitted by the engine after state changes and consumed by
//! subscribers such as views, audit logs, or tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};

use crate::types::{NoteId, NoteStatus};

/// All domain events that can occur in the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum NoteEvent {
    NoteCreated { note_id: NoteId },
    NoteUpdated { note_id: NoteId, status: NoteStatus },
    NoteDeleted { note_id: NoteId },
    NoteEnqueued { note_id: NoteId },
    RunStarted { note_id: NoteId },
    RunCompleted { note_id: NoteId },
    /// A run failed. `will_retry` is false once the retry budget is spent.
    RunFailed {
        note_id: NoteId,
        error: String,
        will_retry: bool,
    },
    NoteEscalated {
        note_id: NoteId,
        escalation_id: NoteId,
    },
    FollowUpCreated {
        note_id: NoteId,
        follow_up_id: NoteId,
    },
    RuleFailed {
        note_id: NoteId,
        rule: String,
        error: String,
    },
}

impl NoteEvent {
    /// The note this event is about.
    pub fn note_id(&self) -> NoteId {
        match self {
            NoteEvent::NoteCreated { note_id }
            | NoteEvent::NoteUpdated { note_id, .. }
            | NoteEvent::NoteDeleted { note_id }
            | NoteEvent::NoteEnqueued { note_id }
            | NoteEvent::RunStarted { note_id }
            | NoteEvent::RunCompleted { note_id }
            | NoteEvent::RunFailed { note_id, .. }
            | NoteEvent::NoteEscalated { note_id, .. }
            | NoteEvent::FollowUpCreated { note_id, .. }
            | NoteEvent::RuleFailed { note_id, .. } => *note_id,
        }
    }

    /// Returns the event name as a snake_case string.
    pub fn event_name(&self) -> &'static str {
        match self {
            NoteEvent::NoteCreated { .. } => "note_created",
            NoteEvent::NoteUpdated { .. } => "note_updated",
            NoteEvent::NoteDeleted { .. } => "note_deleted",
            NoteEvent::NoteEnqueued { .. } => "note_enqueued",
            NoteEvent::RunStarted { .. } => "run_started",
            NoteEvent::RunCompleted { .. } => "run_completed",
            NoteEvent::RunFailed { .. } => "run_failed",
            NoteEvent::NoteEscalated { .. } => "note_escalated",
            NoteEvent::FollowUpCreated { .. } => "follow_up_created",
            NoteEvent::RuleFailed { .. } => "rule_failed",
        }
    }
}

type Listener = Arc<dyn Fn(&NoteEvent) + Send + Sync>;

struct BusInner {
    next_id: AtomicU64,
    listeners: Mutex<BTreeMap<u64, Listener>>,
}

/// Fan-out of [`NoteEvent`]s to registered listeners.
///
/// Cloning the bus yields another handle to the same listener set.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(0),
                listeners: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Register a listener. It stays registered until the returned
    /// [`Subscription`] is unsubscribed or dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&NoteEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        match self.inner.listeners.lock() {
            Ok(mut listeners) => {
                listeners.insert(id, Arc::new(listener));
            }
            Err(e) => tracing::error!(error = %e, "Event bus lock poisoned; listener dropped"),
        }
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every current listener, in subscription order.
    pub fn emit(&self, event: NoteEvent) {
        // Listeners run outside the lock so they may subscribe or unsubscribe.
        let listeners: Vec<Listener> = match self.inner.listeners.lock() {
            Ok(listeners) => listeners.values().cloned().collect(),
            Err(_) => return,
        };
        tracing::trace!(event = event.event_name(), note_id = %event.note_id(), "Emitting event");
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Handle to a registered listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription immediately unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Remove the listener from the bus.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            if let Ok(mut listeners) = inner.listeners.lock() {
                listeners.remove(&self.id);
            }
        }
    }
}
