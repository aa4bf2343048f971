//! State-change notifications for the rendering layer.
//!
//! Components emit fire-and-forget events; a missing or lagging subscriber
//! never blocks or fails the emitter.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{AlarmState, ConnectionState, EntityKind};

const EVENT_CAPACITY: usize = 256;

/// Broadcast emitter shared by one display or checkout session.
#[derive(Debug, Clone)]
pub struct EventBus<E> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn emit(&self, event: E) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Events emitted by the kitchen display session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DisplayEvent {
    /// A new entity was reconciled into the queue.
    ItemArrived { kind: EntityKind, id: i64 },
    /// The queue was replaced from an authoritative snapshot.
    QueueReplaced { orders: usize, calls: usize },
    ItemCompleted { kind: EntityKind, id: i64 },
    CompletionFailed {
        kind: EntityKind,
        id: i64,
        error: String,
    },
    ConnectionChanged { state: ConnectionState },
    AlarmChanged { state: AlarmState },
}
