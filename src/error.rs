//! Error types shared across the live-queue and checkout modules.
//!
//! Infrastructure failures (`ApiError` from a bootstrap fetch, `ChannelError`,
//! `FrameError`) are recovered locally and only logged. Domain failures
//! (`CompletionError`, `PaymentError`) are surfaced to a human.

use serde_json::Value;

use crate::models::EntityKind;

// ---------------------------------------------------------------------------
// Backend REST errors
// ---------------------------------------------------------------------------

/// Failure talking to the backend REST API.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("Cannot reach backend at {0}")]
    Unreachable(String),

    #[error("Connection to {0} timed out")]
    Timeout(String),

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    #[error("Network error communicating with {url}: {message}")]
    Network { url: String, message: String },

    /// Non-2xx response. `body` keeps the parsed JSON body when there was one
    /// so callers can inspect domain codes (e.g. an already-applied payment).
    #[error("{message} (HTTP {status})")]
    Status {
        status: u16,
        message: String,
        body: Option<Value>,
    },

    #[error("Invalid JSON from backend: {0}")]
    Decode(String),
}

impl ApiError {
    /// HTTP status code, when the backend answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Push channel errors
// ---------------------------------------------------------------------------

/// Transient failure of the duplex push channel. Recovered by reconnecting.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Push channel handshake with {url} failed: {message}")]
    Handshake { url: String, message: String },

    #[error("Push channel closed by server")]
    Closed,

    #[error("Push channel transport error: {0}")]
    Transport(String),
}

/// A push frame that could not be turned into an event. Dropped, never applied.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Frame is not valid JSON: {0}")]
    Json(String),

    #[error("Frame has no event type")]
    MissingType,

    #[error("Unknown event type: {0}")]
    UnknownType(String),

    #[error("Invalid {kind} payload: {message}")]
    Payload { kind: &'static str, message: String },
}

// ---------------------------------------------------------------------------
// Operator / customer facing errors
// ---------------------------------------------------------------------------

/// "Mark done" was rejected. The entity stays in the queue for a manual retry.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Failed to complete {kind} #{id}: {source}")]
pub struct CompletionError {
    pub kind: EntityKind,
    pub id: i64,
    #[source]
    pub source: ApiError,
}

/// Payment confirmation failed. The cart is kept and the attempt can be retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment was declined{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Declined { reason: Option<String> },

    #[error("Payment confirmation failed, please try again: {0}")]
    Failed(#[from] ApiError),

    #[error("Payment return is missing a transaction id")]
    MissingTransaction,

    #[error("Payment return URL is malformed: {0}")]
    MalformedReturn(String),

    #[error("Cart is empty")]
    EmptyCart,
}

/// A menu or option pick the ordering screen refuses to put in the cart.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("{0} is sold out")]
    SoldOut(String),

    #[error("'{group}' option is required")]
    Required { group: String },

    #[error("'{group}' allows at most {max} selection(s)")]
    TooMany { group: String, max: u32 },

    #[error("Option {0} is not offered for this menu")]
    UnknownOption(i64),
}

/// Order or staff-call submission from the ordering screen failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubmitError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Order submission failed: {0}")]
    Api(#[from] ApiError),
}

/// Invalid or incomplete runtime configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("Invalid config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("Missing required setting {0}")]
    Missing(&'static str),
}
