//! Shared mutable state of one kitchen display session.
//!
//! The live queue and the alarm sit behind one mutex so that the three write
//! patterns (replace, insert, remove-by-id) and the alarm transitions they
//! cause are serialized. The lock is never held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::alarm::{AlarmMachine, AudioPlayback};
use crate::events::{DisplayEvent, EventBus};
use crate::models::{AlarmState, ConnectionState, EntityKind, PushEvent};
use crate::reconciler::{self, ApplyOutcome, SnapshotDiff};
use crate::store::{LiveQueueState, QueueSnapshot};

struct SessionState {
    queue: LiveQueueState,
    alarm: AlarmMachine,
}

pub struct Session {
    store_id: i64,
    state: Mutex<SessionState>,
    connection: watch::Sender<ConnectionState>,
    events: EventBus<DisplayEvent>,
}

impl Session {
    pub fn new(store_id: i64, playback: Arc<dyn AudioPlayback>) -> Self {
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            store_id,
            state: Mutex::new(SessionState {
                queue: LiveQueueState::new(),
                alarm: AlarmMachine::new(playback),
            }),
            connection,
            events: EventBus::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store_id(&self) -> i64 {
        self.store_id
    }

    pub fn events(&self) -> &EventBus<DisplayEvent> {
        &self.events
    }

    // -- Reads ---------------------------------------------------------------

    pub fn queue(&self) -> QueueSnapshot {
        self.lock().queue.snapshot()
    }

    pub fn alarm_state(&self) -> AlarmState {
        self.lock().alarm.state()
    }

    pub fn audio_authorized(&self) -> bool {
        self.lock().alarm.is_authorized()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    // -- Connection (written by the push channel manager only) ---------------

    pub(crate) fn set_connection_state(&self, state: ConnectionState) {
        let changed = self.connection.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            debug!(store_id = self.store_id, state = ?state, "Connection state changed");
            self.events.emit(DisplayEvent::ConnectionChanged { state });
        }
    }

    // -- Queue writers -------------------------------------------------------

    /// Reconcile one push event and let the alarm react to an insertion.
    pub fn apply_push(&self, event: PushEvent) -> ApplyOutcome {
        let kind = event.kind();
        let id = event.id();
        let (outcome, rang) = {
            let mut state = self.lock();
            let outcome = reconciler::apply(&mut state.queue, event);
            let rang = outcome == ApplyOutcome::Inserted && state.alarm.on_insert();
            (outcome, rang)
        };

        match outcome {
            ApplyOutcome::Inserted => {
                info!(store_id = self.store_id, kind = %kind, id, "New item queued");
                self.events.emit(DisplayEvent::ItemArrived { kind, id });
                if rang {
                    self.events.emit(DisplayEvent::AlarmChanged {
                        state: AlarmState::Ringing,
                    });
                }
            }
            ApplyOutcome::Duplicate => {
                debug!(store_id = self.store_id, kind = %kind, id, "Duplicate push ignored");
            }
        }
        outcome
    }

    pub(crate) fn begin_bootstrap(&self) {
        self.lock().queue.begin_bootstrap();
    }

    pub(crate) fn abort_bootstrap(&self) {
        self.lock().queue.abort_bootstrap();
    }

    pub(crate) fn replace(&self, snapshot: QueueSnapshot) {
        let (orders, calls) = {
            let mut state = self.lock();
            state.queue.replace(snapshot);
            (state.queue.order_count(), state.queue.call_count())
        };
        self.events.emit(DisplayEvent::QueueReplaced { orders, calls });
    }

    /// Polling reconciliation: replace from a snapshot, ringing for new ids.
    pub(crate) fn reconcile_snapshot(&self, snapshot: QueueSnapshot) -> SnapshotDiff {
        let (diff, rang) = {
            let mut state = self.lock();
            let diff = reconciler::diff_snapshot(&mut state.queue, snapshot);
            let rang = !diff.inserted.is_empty() && state.alarm.on_insert();
            (diff, rang)
        };

        for (kind, id) in &diff.inserted {
            self.events.emit(DisplayEvent::ItemArrived { kind: *kind, id: *id });
        }
        if rang {
            self.events.emit(DisplayEvent::AlarmChanged {
                state: AlarmState::Ringing,
            });
        }
        diff
    }

    /// Remove a completed entity and re-evaluate the alarm.
    pub(crate) fn remove_completed(&self, kind: EntityKind, id: i64) -> bool {
        let (removed, silenced) = {
            let mut state = self.lock();
            let removed = state.queue.remove(kind, id);
            let empty = state.queue.is_empty();
            (removed, state.alarm.on_completion(empty))
        };

        if removed {
            self.events.emit(DisplayEvent::ItemCompleted { kind, id });
        }
        if silenced {
            info!(store_id = self.store_id, "Queue empty, alarm silenced");
            self.events.emit(DisplayEvent::AlarmChanged {
                state: AlarmState::Silent,
            });
        }
        removed
    }

    // -- Operator actions ----------------------------------------------------

    pub fn acknowledge_alarm(&self) {
        let changed = self.lock().alarm.acknowledge();
        if changed {
            info!(store_id = self.store_id, "Alarm acknowledged");
            self.events.emit(DisplayEvent::AlarmChanged {
                state: AlarmState::Silent,
            });
        }
    }

    pub fn authorize_audio(&self) -> bool {
        self.lock().alarm.authorize()
    }

    /// Stop any audio intent. Called on teardown.
    pub(crate) fn shutdown_alarm(&self) {
        let was_ringing = {
            let mut state = self.lock();
            let ringing = state.alarm.state() == AlarmState::Ringing;
            state.alarm.shutdown();
            ringing
        };
        if was_ringing {
            self.events.emit(DisplayEvent::AlarmChanged {
                state: AlarmState::Silent,
            });
        }
    }
}
