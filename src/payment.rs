//! Payment callback guard.
//!
//! A checkout is confirmed either directly in-session or through a redirect
//! return from the payment provider. Both paths funnel through
//! [`PaymentGuard`], which applies the terminal action (reveal the display
//! number, clear the cart) at most once per checkout attempt.

use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::Backend;
use crate::error::PaymentError;
use crate::events::EventBus;
use crate::ordering::{Cart, CartLine, SubmittedOrder};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Body of `PATCH /payments/{transaction_id}/confirm`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentConfirmation {
    #[serde(skip)]
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
    pub idempotency_key: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmResponse {
    Applied { display_number: Option<u32> },
    /// The backend had already applied this payment (HTTP 409 or an
    /// `ALREADY_APPLIED` code). Treated as success.
    AlreadyApplied { display_number: Option<u32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmSource {
    Direct,
    Redirect,
}

// ---------------------------------------------------------------------------
// Redirect return
// ---------------------------------------------------------------------------

/// Query parameters of the payment provider's return URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectReturn {
    pub transaction_id: Option<String>,
    pub success: bool,
    pub code: Option<String>,
    pub message: Option<String>,
}

impl RedirectReturn {
    pub fn from_url(url: &str) -> Result<Self, PaymentError> {
        let parsed =
            reqwest::Url::parse(url).map_err(|e| PaymentError::MalformedReturn(e.to_string()))?;
        Ok(Self::from_pairs(parsed.query_pairs().into_owned()))
    }

    /// Parse a raw query string, with or without the leading `?`.
    pub fn from_query(query: &str) -> Self {
        let query = query.trim_start_matches('?');
        let pairs = reqwest::Url::parse(&format!("http://return.invalid/?{query}"))
            .map(|u| u.query_pairs().into_owned().collect::<Vec<_>>())
            .unwrap_or_default();
        Self::from_pairs(pairs)
    }

    fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut ret = RedirectReturn::default();
        let mut flag: Option<bool> = None;
        for (key, value) in pairs {
            match key.as_str() {
                "paymentKey" | "txnId" | "transaction_id" if !value.is_empty() => {
                    ret.transaction_id.get_or_insert(value);
                }
                "success" => {
                    flag = Some(matches!(value.to_ascii_lowercase().as_str(), "true" | "1"))
                }
                "status" => {
                    flag = Some(matches!(
                        value.to_ascii_lowercase().as_str(),
                        "success" | "done" | "paid"
                    ))
                }
                "code" => ret.code = Some(value),
                "message" => ret.message = Some(value),
                _ => {}
            }
        }
        // Providers with a dedicated success URL send no flag at all.
        ret.success = flag.unwrap_or(ret.code.is_none() && ret.transaction_id.is_some());
        ret
    }

    fn decline_reason(&self) -> Option<String> {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => Some(format!("{message} ({code})")),
            (None, Some(message)) => Some(message.clone()),
            (Some(code), None) => Some(code.clone()),
            (None, None) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Checkout attempt
// ---------------------------------------------------------------------------

/// One checkout attempt: the idempotency token and the cart snapshot the
/// charge was computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutAttempt {
    pub idempotency_key: String,
    pub lines: Vec<CartLine>,
    pub total: i64,
    pub order_id: Option<i64>,
    pub known_display_number: Option<u32>,
}

impl CheckoutAttempt {
    pub fn new(cart: &Cart, submitted: Option<SubmittedOrder>) -> Result<Self, PaymentError> {
        if cart.is_empty() {
            return Err(PaymentError::EmptyCart);
        }
        Ok(Self {
            idempotency_key: Uuid::new_v4().to_string(),
            lines: cart.lines().to_vec(),
            total: cart.total(),
            order_id: submitted.and_then(|s| s.order_id),
            known_display_number: submitted.and_then(|s| s.display_number),
        })
    }
}

/// Terminal outcome of a checkout attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentReceipt {
    pub transaction_id: String,
    pub display_number: Option<u32>,
    pub source: ConfirmSource,
    pub already_applied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmDisposition {
    /// This call applied the terminal action.
    Completed(PaymentReceipt),
    /// Another confirmation was in flight; nothing was sent.
    Suppressed,
    /// The attempt was already settled by an earlier confirmation.
    AlreadySettled(PaymentReceipt),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CheckoutEvent {
    Confirming { source: ConfirmSource },
    Paid { display_number: Option<u32> },
    Failed { error: String },
}

struct GuardState {
    attempt: CheckoutAttempt,
    cart: Cart,
    in_flight: bool,
    settled: Option<PaymentReceipt>,
}

/// Holds the in-flight claim of one confirmation. Dropping it releases the
/// claim, so a confirmation future cancelled mid-request stays retryable.
struct InFlight<'a> {
    state: &'a Mutex<GuardState>,
    armed: bool,
}

impl InFlight<'_> {
    /// Release the claim under a lock the caller already holds.
    fn release(mut self, state: &mut GuardState) {
        state.in_flight = false;
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.lock().unwrap_or_else(PoisonError::into_inner).in_flight = false;
        }
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

pub struct PaymentGuard {
    backend: Arc<dyn Backend>,
    state: Mutex<GuardState>,
    events: EventBus<CheckoutEvent>,
}

impl PaymentGuard {
    /// Start a checkout attempt over `cart`. `submitted` is the order the
    /// payment is for, when it was submitted beforehand.
    pub fn begin(
        backend: Arc<dyn Backend>,
        cart: Cart,
        submitted: Option<SubmittedOrder>,
    ) -> Result<Self, PaymentError> {
        let attempt = CheckoutAttempt::new(&cart, submitted)?;
        info!(
            idempotency_key = %attempt.idempotency_key,
            total = attempt.total,
            "Checkout attempt started"
        );
        Ok(Self {
            backend,
            state: Mutex::new(GuardState {
                attempt,
                cart,
                in_flight: false,
                settled: None,
            }),
            events: EventBus::new(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> &EventBus<CheckoutEvent> {
        &self.events
    }

    pub fn attempt(&self) -> CheckoutAttempt {
        self.lock().attempt.clone()
    }

    /// Current cart. Empty once the payment settled.
    pub fn cart(&self) -> Cart {
        self.lock().cart.clone()
    }

    pub fn is_in_flight(&self) -> bool {
        self.lock().in_flight
    }

    pub fn receipt(&self) -> Option<PaymentReceipt> {
        self.lock().settled.clone()
    }

    /// In-session confirmation carrying the provider's transaction id.
    pub async fn confirm_direct(
        &self,
        transaction_id: &str,
    ) -> Result<ConfirmDisposition, PaymentError> {
        if transaction_id.trim().is_empty() {
            return Err(PaymentError::MissingTransaction);
        }
        self.confirm(transaction_id.trim(), ConfirmSource::Direct).await
    }

    /// Confirmation arriving through the provider's redirect return.
    pub async fn handle_redirect(
        &self,
        ret: &RedirectReturn,
    ) -> Result<ConfirmDisposition, PaymentError> {
        {
            let state = self.lock();
            if let Some(receipt) = &state.settled {
                return Ok(ConfirmDisposition::AlreadySettled(receipt.clone()));
            }
            if state.in_flight {
                debug!("Redirect return while a confirmation is in flight");
                return Ok(ConfirmDisposition::Suppressed);
            }
        }
        if !ret.success {
            let reason = ret.decline_reason();
            warn!(reason = ?reason, "Payment declined by provider");
            return Err(PaymentError::Declined { reason });
        }
        let transaction_id = ret
            .transaction_id
            .as_deref()
            .ok_or(PaymentError::MissingTransaction)?;
        self.confirm(transaction_id, ConfirmSource::Redirect).await
    }

    async fn confirm(
        &self,
        transaction_id: &str,
        source: ConfirmSource,
    ) -> Result<ConfirmDisposition, PaymentError> {
        let (confirmation, claim) = {
            let mut state = self.lock();
            if let Some(receipt) = &state.settled {
                return Ok(ConfirmDisposition::AlreadySettled(receipt.clone()));
            }
            if state.in_flight {
                debug!(?source, "Confirmation suppressed; another one is in flight");
                return Ok(ConfirmDisposition::Suppressed);
            }
            state.in_flight = true;
            let confirmation = PaymentConfirmation {
                transaction_id: transaction_id.to_string(),
                order_id: state.attempt.order_id,
                idempotency_key: state.attempt.idempotency_key.clone(),
                amount: state.attempt.total,
            };
            let claim = InFlight {
                state: &self.state,
                armed: true,
            };
            (confirmation, claim)
        };

        self.events.emit(CheckoutEvent::Confirming { source });
        let result = self.backend.confirm_payment(&confirmation).await;

        let mut state = self.lock();
        claim.release(&mut state);
        match result {
            Ok(response) => {
                let (display_number, already_applied) = match response {
                    ConfirmResponse::Applied { display_number } => (display_number, false),
                    ConfirmResponse::AlreadyApplied { display_number } => (display_number, true),
                };
                let receipt = PaymentReceipt {
                    transaction_id: confirmation.transaction_id,
                    display_number: display_number.or(state.attempt.known_display_number),
                    source,
                    already_applied,
                };
                state.settled = Some(receipt.clone());
                state.cart.clear();
                drop(state);

                info!(
                    transaction_id = %receipt.transaction_id,
                    display_number = ?receipt.display_number,
                    already_applied,
                    ?source,
                    "Payment settled"
                );
                self.events.emit(CheckoutEvent::Paid {
                    display_number: receipt.display_number,
                });
                Ok(ConfirmDisposition::Completed(receipt))
            }
            Err(e) => {
                drop(state);
                warn!(
                    transaction_id = %confirmation.transaction_id,
                    error = %e,
                    ?source,
                    "Payment confirmation failed"
                );
                self.events.emit(CheckoutEvent::Failed {
                    error: e.to_string(),
                });
                Err(PaymentError::Failed(e))
            }
        }
    }
}
