//! Backend REST API client.
//!
//! [`Backend`] is the seam the live queue and checkout code talk to;
//! [`HttpBackend`] is the reqwest implementation used in production.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::models::{CallId, Order, OrderId, ServiceCall};
use crate::ordering::{OrderSubmission, StaffCallRequest, SubmittedOrder};
use crate::payment::{ConfirmResponse, PaymentConfirmation};

/// Default timeout for API requests (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Domain code some backends return (with a 2xx or 409) when a payment was
/// confirmed before.
const ALREADY_APPLIED_CODE: &str = "ALREADY_APPLIED";

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the backend base URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
/// - strip a trailing `/api` segment
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

pub(crate) fn percent_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for b in input.bytes() {
        let is_unreserved =
            b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' || b == b'~';
        if is_unreserved {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{b:02X}"));
        }
    }
    encoded
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into an operator-friendly error.
fn friendly_error(url: &str, err: &reqwest::Error) -> ApiError {
    if err.is_connect() {
        return ApiError::Unreachable(url.to_string());
    }
    if err.is_timeout() {
        return ApiError::Timeout(url.to_string());
    }
    if err.is_builder() {
        return ApiError::InvalidUrl(url.to_string());
    }
    ApiError::Network {
        url: url.to_string(),
        message: err.to_string(),
    }
}

/// Human message for an HTTP status code.
fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Session is invalid or expired".to_string(),
        403 => "Not authorized for this store".to_string(),
        404 => "Backend endpoint or record not found".to_string(),
        409 => "Request conflicts with current state".to_string(),
        s if s >= 500 => "Backend server error".to_string(),
        _ => "Unexpected response from backend".to_string(),
    }
}

fn status_error(status: StatusCode, body_text: &str) -> ApiError {
    let body = serde_json::from_str::<Value>(body_text).ok();
    let message = body
        .as_ref()
        .and_then(|json| {
            json.get("detail")
                .or_else(|| json.get("error"))
                .or_else(|| json.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| status_message(status));
    ApiError::Status {
        status: status.as_u16(),
        message,
        body,
    }
}

// ---------------------------------------------------------------------------
// Response decoding
// ---------------------------------------------------------------------------

/// Accept either a bare array or an object wrapping one under `keys`.
fn extract_array(value: Value, keys: &[&str]) -> Result<Vec<Value>, ApiError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut obj) => {
            for key in keys {
                if let Some(Value::Array(items)) = obj.remove(*key) {
                    return Ok(items);
                }
            }
            Err(ApiError::Decode(format!(
                "expected an array or an object with one of {keys:?}"
            )))
        }
        Value::Null => Ok(Vec::new()),
        other => Err(ApiError::Decode(format!("expected an array, got {other}"))),
    }
}

/// Decode each element on its own; a single malformed row is skipped so it
/// cannot blank the whole queue.
fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>, what: &str) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value::<T>(row) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(kind = what, error = %e, "Skipping malformed row from backend");
                None
            }
        })
        .collect()
}

pub(crate) fn display_number_from(body: &Value) -> Option<u32> {
    ["daily_number", "display_number", "dailyNumber"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_u64))
        .and_then(|n| u32::try_from(n).ok())
}

fn is_already_applied(body: &Value) -> bool {
    body.get("code")
        .and_then(Value::as_str)
        .map(|code| code.eq_ignore_ascii_case(ALREADY_APPLIED_CODE))
        .unwrap_or(false)
        || body
            .get("already_applied")
            .and_then(Value::as_bool)
            .unwrap_or(false)
}

/// Map the raw confirm response. An already-applied payment (409, or an
/// `ALREADY_APPLIED` marker on either a 2xx or an error body) is a success.
fn confirm_response(result: Result<Value, ApiError>) -> Result<ConfirmResponse, ApiError> {
    match result {
        Ok(value) if is_already_applied(&value) => Ok(ConfirmResponse::AlreadyApplied {
            display_number: display_number_from(&value),
        }),
        Ok(value) => Ok(ConfirmResponse::Applied {
            display_number: display_number_from(&value),
        }),
        Err(ApiError::Status { status, body, .. })
            if status == StatusCode::CONFLICT.as_u16()
                || body.as_ref().map(is_already_applied).unwrap_or(false) =>
        {
            Ok(ConfirmResponse::AlreadyApplied {
                display_number: body.as_ref().and_then(display_number_from),
            })
        }
        Err(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// Backend seam
// ---------------------------------------------------------------------------

/// REST collaborator consumed by the live queue and checkout flows.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Orders for the store that are not completed yet.
    async fn pending_orders(&self, store_id: i64) -> Result<Vec<Order>, ApiError>;

    /// Open service calls for the store.
    async fn pending_calls(&self, store_id: i64) -> Result<Vec<ServiceCall>, ApiError>;

    async fn complete_order(&self, order_id: OrderId) -> Result<(), ApiError>;

    async fn complete_call(&self, call_id: CallId) -> Result<(), ApiError>;

    /// Confirm an external payment. An already-applied confirmation is an
    /// `Ok(ConfirmResponse::AlreadyApplied)`, not an error.
    async fn confirm_payment(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<ConfirmResponse, ApiError>;

    async fn submit_order(&self, submission: &OrderSubmission) -> Result<SubmittedOrder, ApiError>;

    async fn call_staff(&self, store_id: i64, request: &StaffCallRequest) -> Result<(), ApiError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

pub struct HttpBackend {
    base_url: String,
    client: Client,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = normalize_base_url(base_url);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network {
                url: base_url.clone(),
                message: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform a JSON request. `path` includes the leading slash. Empty
    /// bodies (204) come back as `Value::Null`.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let full_url = format!("{}{path}", self.base_url);
        debug!(method = %method, url = %full_url, "backend request");

        let mut req = self.client.request(method, &full_url);
        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(status_error(status, &body_text));
        }
        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn pending_orders(&self, store_id: i64) -> Result<Vec<Order>, ApiError> {
        let value = self
            .request(Method::GET, &format!("/stores/{store_id}/orders"), None)
            .await?;
        let rows = extract_array(value, &["orders", "data"])?;
        let orders: Vec<Order> = decode_rows(rows, "order");
        Ok(orders.into_iter().filter(|o| !o.is_completed).collect())
    }

    async fn pending_calls(&self, store_id: i64) -> Result<Vec<ServiceCall>, ApiError> {
        let value = self
            .request(Method::GET, &format!("/stores/{store_id}/calls"), None)
            .await?;
        let rows = extract_array(value, &["calls", "data"])?;
        Ok(decode_rows(rows, "call"))
    }

    async fn complete_order(&self, order_id: OrderId) -> Result<(), ApiError> {
        self.request(Method::PATCH, &format!("/orders/{order_id}/complete"), None)
            .await
            .map(|_| ())
    }

    async fn complete_call(&self, call_id: CallId) -> Result<(), ApiError> {
        self.request(Method::PATCH, &format!("/calls/{call_id}/complete"), None)
            .await
            .map(|_| ())
    }

    async fn confirm_payment(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<ConfirmResponse, ApiError> {
        let path = format!(
            "/payments/{}/confirm",
            percent_encode(&confirmation.transaction_id)
        );
        let body = serde_json::to_value(confirmation).map_err(|e| ApiError::Decode(e.to_string()))?;

        let result = self.request(Method::PATCH, &path, Some(body)).await;
        if let Err(e) = &result {
            debug!(error = %e, "Payment confirm returned an error");
        }
        confirm_response(result)
    }

    async fn submit_order(&self, submission: &OrderSubmission) -> Result<SubmittedOrder, ApiError> {
        let body = serde_json::to_value(submission).map_err(|e| ApiError::Decode(e.to_string()))?;
        let value = self.request(Method::POST, "/orders/", Some(body)).await?;
        Ok(SubmittedOrder {
            order_id: ["id", "order_id"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_i64)),
            display_number: display_number_from(&value),
        })
    }

    async fn call_staff(&self, store_id: i64, request: &StaffCallRequest) -> Result<(), ApiError> {
        let body = serde_json::to_value(request).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.request(Method::POST, &format!("/stores/{store_id}/calls"), Some(body))
            .await
            .map(|_| ())
    }
}
