//! In-memory fakes shared by the unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::alarm::AudioPlayback;
use crate::api::Backend;
use crate::channel::{PushStream, PushTransport};
use crate::error::{ApiError, ChannelError};
use crate::models::{CallId, EntityKind, Order, OrderId, OrderItem, ServiceCall};
use crate::ordering::{OrderSubmission, StaffCallRequest, SubmittedOrder};
use crate::payment::{ConfirmResponse, PaymentConfirmation};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn order(id: i64) -> Order {
    Order {
        id,
        daily_number: Some(id as u32),
        table_id: Some(1),
        table_name: Some("T1".to_string()),
        created_at: "12:00".to_string(),
        items: vec![OrderItem {
            menu_name: "Kimchi stew".to_string(),
            quantity: 1,
            options: None,
        }],
        is_completed: false,
    }
}

pub fn call(id: i64) -> ServiceCall {
    ServiceCall {
        id,
        table_name: Some("T2".to_string()),
        message: "water".to_string(),
        created_at: "12:05".to_string(),
    }
}

/// Flat `NEW_ORDER` frame that decodes to `order(id)`.
pub fn order_frame(id: i64) -> String {
    serde_json::json!({
        "type": "NEW_ORDER",
        "order_id": id,
        "daily_number": id,
        "table_id": 1,
        "table_name": "T1",
        "created_at": "12:00",
        "items": [{ "menu_name": "Kimchi stew", "quantity": 1 }],
    })
    .to_string()
}

/// Flat `STAFF_CALL` frame that decodes to `call(id)`.
pub fn call_frame(id: i64) -> String {
    serde_json::json!({
        "type": "STAFF_CALL",
        "id": id,
        "table_name": "T2",
        "message": "water",
        "created_at": "12:05",
    })
    .to_string()
}

fn backend_down() -> ApiError {
    ApiError::Unreachable("http://fake".to_string())
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

pub struct FakePlayback {
    allow: AtomicBool,
    authorize_calls: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl FakePlayback {
    pub fn new(allow: bool) -> Self {
        Self {
            allow: AtomicBool::new(allow),
            authorize_calls: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn set_allow(&self, allow: bool) {
        self.allow.store(allow, Ordering::SeqCst);
    }

    pub fn authorize_calls(&self) -> usize {
        self.authorize_calls.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl AudioPlayback for FakePlayback {
    fn authorize(&self) -> bool {
        self.authorize_calls.fetch_add(1, Ordering::SeqCst);
        self.allow.load(Ordering::SeqCst)
    }

    fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeBackend {
    pending: Mutex<(Vec<Order>, Vec<ServiceCall>)>,
    fail_orders: AtomicBool,
    fail_calls: AtomicBool,
    fail_completions: AtomicBool,
    pending_fetches: AtomicUsize,
    completed: Mutex<Vec<(EntityKind, i64)>>,
    confirm_script: Mutex<VecDeque<Result<ConfirmResponse, ApiError>>>,
    confirm_gate: Mutex<Option<Arc<Notify>>>,
    confirmations: Mutex<Vec<PaymentConfirmation>>,
    submissions: Mutex<Vec<OrderSubmission>>,
    staff_calls: Mutex<Vec<(i64, StaffCallRequest)>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pending(&self, orders: Vec<Order>, calls: Vec<ServiceCall>) {
        *self.pending.lock().unwrap() = (orders, calls);
    }

    pub fn fail_pending_orders(&self, fail: bool) {
        self.fail_orders.store(fail, Ordering::SeqCst);
    }

    pub fn fail_pending_calls(&self, fail: bool) {
        self.fail_calls.store(fail, Ordering::SeqCst);
    }

    pub fn fail_completions(&self, fail: bool) {
        self.fail_completions.store(fail, Ordering::SeqCst);
    }

    /// Number of `pending_orders` requests served.
    pub fn pending_fetches(&self) -> usize {
        self.pending_fetches.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> Vec<(EntityKind, i64)> {
        self.completed.lock().unwrap().clone()
    }

    /// Queue the next confirmation responses. Unscripted calls succeed with
    /// display number 42.
    pub fn script_confirmations(&self, responses: Vec<Result<ConfirmResponse, ApiError>>) {
        self.confirm_script.lock().unwrap().extend(responses);
    }

    /// Make confirmations wait until the returned gate is notified.
    pub fn hold_confirmations(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.confirm_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Undo [`hold_confirmations`](Self::hold_confirmations).
    pub fn release_confirmations(&self) {
        *self.confirm_gate.lock().unwrap() = None;
    }

    pub fn confirmations(&self) -> Vec<PaymentConfirmation> {
        self.confirmations.lock().unwrap().clone()
    }

    pub fn submissions(&self) -> Vec<OrderSubmission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn staff_calls(&self) -> Vec<(i64, StaffCallRequest)> {
        self.staff_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn pending_orders(&self, _store_id: i64) -> Result<Vec<Order>, ApiError> {
        self.pending_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(backend_down());
        }
        Ok(self.pending.lock().unwrap().0.clone())
    }

    async fn pending_calls(&self, _store_id: i64) -> Result<Vec<ServiceCall>, ApiError> {
        if self.fail_calls.load(Ordering::SeqCst) {
            return Err(backend_down());
        }
        Ok(self.pending.lock().unwrap().1.clone())
    }

    async fn complete_order(&self, order_id: OrderId) -> Result<(), ApiError> {
        if self.fail_completions.load(Ordering::SeqCst) {
            return Err(backend_down());
        }
        self.completed
            .lock()
            .unwrap()
            .push((EntityKind::Order, order_id));
        Ok(())
    }

    async fn complete_call(&self, call_id: CallId) -> Result<(), ApiError> {
        if self.fail_completions.load(Ordering::SeqCst) {
            return Err(backend_down());
        }
        self.completed.lock().unwrap().push((EntityKind::Call, call_id));
        Ok(())
    }

    async fn confirm_payment(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<ConfirmResponse, ApiError> {
        self.confirmations.lock().unwrap().push(confirmation.clone());
        let gate = self.confirm_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.confirm_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(ConfirmResponse::Applied {
                display_number: Some(42),
            }))
    }

    async fn submit_order(&self, submission: &OrderSubmission) -> Result<SubmittedOrder, ApiError> {
        self.submissions.lock().unwrap().push(submission.clone());
        Ok(SubmittedOrder {
            order_id: Some(100),
            display_number: Some(17),
        })
    }

    async fn call_staff(&self, store_id: i64, request: &StaffCallRequest) -> Result<(), ApiError> {
        self.staff_calls
            .lock()
            .unwrap()
            .push((store_id, request.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Push transport
// ---------------------------------------------------------------------------

struct ScriptedConnection {
    frames: Vec<String>,
    closes: bool,
}

/// Hands out pre-scripted connections in order. Without a script left,
/// `connect` fails.
#[derive(Default)]
pub struct ScriptedTransport {
    connections: Mutex<VecDeque<ScriptedConnection>>,
    fail_next: AtomicUsize,
    connects: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connection that delivers `frames` and then stays open.
    pub fn push_connection(&self, frames: Vec<String>) {
        self.connections
            .lock()
            .unwrap()
            .push_back(ScriptedConnection {
                frames,
                closes: false,
            });
    }

    /// A connection that delivers `frames` and then is closed by the server.
    pub fn push_closing_connection(&self, frames: Vec<String>) {
        self.connections
            .lock()
            .unwrap()
            .push_back(ScriptedConnection {
                frames,
                closes: true,
            });
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushTransport for ScriptedTransport {
    async fn connect(&self, _store_id: i64) -> Result<Box<dyn PushStream>, ChannelError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ChannelError::Handshake {
                url: "ws://fake/ws/1".to_string(),
                message: "connection refused".to_string(),
            });
        }
        let next = self.connections.lock().unwrap().pop_front();
        match next {
            Some(conn) => Ok(Box::new(ScriptedStream {
                frames: conn.frames.into(),
                closes: conn.closes,
            })),
            None => Err(ChannelError::Handshake {
                url: "ws://fake/ws/1".to_string(),
                message: "no scripted connection".to_string(),
            }),
        }
    }
}

struct ScriptedStream {
    frames: VecDeque<String>,
    closes: bool,
}

#[async_trait]
impl PushStream for ScriptedStream {
    async fn next_text(&mut self) -> Option<Result<String, ChannelError>> {
        if let Some(frame) = self.frames.pop_front() {
            return Some(Ok(frame));
        }
        if self.closes {
            return None;
        }
        std::future::pending().await
    }

    async fn close(&mut self) {}
}
