//! Domain types for the live kitchen queue.
//!
//! Field names follow the backend's JSON (snake_case). Orders and service
//! calls are keyed by their server-issued `id`.

use serde::{Deserialize, Serialize};
use std::fmt;

pub type OrderId = i64;
pub type CallId = i64;

/// Which of the two independent queues an entity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Order,
    Call,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Order => f.write_str("order"),
            EntityKind::Call => f.write_str("service call"),
        }
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

fn default_quantity() -> u32 {
    1
}

/// A single line on a kitchen ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub menu_name: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    /// Option description, one option group per line.
    #[serde(default)]
    pub options: Option<String>,
}

/// A placed food order awaiting kitchen completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    #[serde(alias = "order_id")]
    pub id: OrderId,
    /// Daily-reset number called out to the customer.
    #[serde(default)]
    pub daily_number: Option<u32>,
    #[serde(default)]
    pub table_id: Option<i64>,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default, skip_serializing)]
    pub is_completed: bool,
}

impl Order {
    pub fn table_label(&self) -> &str {
        self.table_name.as_deref().unwrap_or("Unknown")
    }
}

// ---------------------------------------------------------------------------
// Service calls
// ---------------------------------------------------------------------------

/// A non-food request raised from a table ("need water").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCall {
    pub id: CallId,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub created_at: String,
}

impl ServiceCall {
    pub fn table_label(&self) -> &str {
        self.table_name.as_deref().unwrap_or("Unknown")
    }
}

// ---------------------------------------------------------------------------
// Push events
// ---------------------------------------------------------------------------

/// An incremental event delivered over the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    NewOrder(Order),
    StaffCall(ServiceCall),
}

impl PushEvent {
    pub fn kind(&self) -> EntityKind {
        match self {
            PushEvent::NewOrder(_) => EntityKind::Order,
            PushEvent::StaffCall(_) => EntityKind::Call,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            PushEvent::NewOrder(order) => order.id,
            PushEvent::StaffCall(call) => call.id,
        }
    }
}

// ---------------------------------------------------------------------------
// Derived states
// ---------------------------------------------------------------------------

/// Push channel connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Audible alert state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    #[default]
    Silent,
    Ringing,
}
