//! Push channel manager.
//!
//! Owns the duplex connection to the store's channel, the single pending
//! reconnect timer and frame routing. Connection state transitions:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected -> (delay) -> Connecting ...
//! ```
//!
//! The queue is bootstrapped once on start and again after every successful
//! handshake, before any frame is read. Events missed while disconnected are
//! recovered from the pull path; frames buffered meanwhile are deduplicated
//! by the reconciler.

pub mod frame;
pub mod ws;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bootstrap::BootstrapLoader;
use crate::error::ChannelError;
use crate::models::ConnectionState;
use crate::session::Session;

pub use ws::WebSocketTransport;

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// Opens a duplex connection to a store's push channel.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self, store_id: i64) -> Result<Box<dyn PushStream>, ChannelError>;
}

/// An open push connection.
#[async_trait]
pub trait PushStream: Send {
    /// Next text frame. `None` once the server closed the channel.
    async fn next_text(&mut self) -> Option<Result<String, ChannelError>>;

    async fn close(&mut self);
}

// ---------------------------------------------------------------------------
// Reconnect policy
// ---------------------------------------------------------------------------

/// Delay before the next connection attempt. Retries never stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    Fixed { delay_ms: u64 },
    CappedExponential { base_ms: u64, max_ms: u64 },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed { delay_ms: 3_000 }
    }
}

impl ReconnectPolicy {
    /// Delay after `failures` consecutive failed attempts (0 = first retry).
    pub fn delay(&self, failures: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            ReconnectPolicy::CappedExponential { base_ms, max_ms } => {
                let factor = 1u64 << failures.min(20);
                Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

enum PumpEnd {
    Cancelled,
    Lost(ChannelError),
}

pub struct PushChannelManager {
    session: Arc<Session>,
    transport: Arc<dyn PushTransport>,
    loader: BootstrapLoader,
    policy: ReconnectPolicy,
}

/// Running manager (or polling) task. Dropping the handle does not stop the task; call
/// [`ChannelHandle::shutdown`].
pub struct ChannelHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    pub(crate) fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { cancel, task }
    }

    /// Tear down the connection and cancel the pending reconnect timer.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Push channel task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl PushChannelManager {
    pub fn new(
        session: Arc<Session>,
        transport: Arc<dyn PushTransport>,
        loader: BootstrapLoader,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            session,
            transport,
            loader,
            policy,
        }
    }

    pub fn spawn(self) -> ChannelHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.run(token).await });
        ChannelHandle { cancel, task }
    }

    async fn run(self, cancel: CancellationToken) {
        let store_id = self.session.store_id();
        info!(store_id, policy = ?self.policy, "Push channel manager started");
        let mut failures: u32 = 0;

        // Initial mount: show what is pending even if the channel is down.
        tokio::select! {
            _ = cancel.cancelled() => {
                self.session.abort_bootstrap();
                return;
            }
            _ = self.loader.refresh(&self.session) => {}
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.session.set_connection_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.transport.connect(store_id) => result,
            };

            match connected {
                Ok(mut stream) => {
                    failures = 0;
                    self.session.set_connection_state(ConnectionState::Connected);

                    let bootstrapped = tokio::select! {
                        _ = cancel.cancelled() => None,
                        ok = self.loader.refresh(&self.session) => Some(ok),
                    };
                    if bootstrapped.is_none() {
                        self.session.abort_bootstrap();
                        stream.close().await;
                        break;
                    }

                    match self.pump(&mut *stream, &cancel).await {
                        PumpEnd::Cancelled => {
                            stream.close().await;
                            break;
                        }
                        PumpEnd::Lost(e) => {
                            warn!(store_id, error = %e, "Push channel lost; will reconnect");
                        }
                    }
                }
                Err(e) => {
                    warn!(store_id, failures, error = %e, "Push channel connect failed");
                    failures = failures.saturating_add(1);
                }
            }

            self.session.set_connection_state(ConnectionState::Disconnected);
            let delay = self.policy.delay(failures.saturating_sub(1));
            debug!(store_id, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.session.set_connection_state(ConnectionState::Disconnected);
        info!(store_id, "Push channel manager stopped");
    }

    async fn pump(&self, stream: &mut dyn PushStream, cancel: &CancellationToken) -> PumpEnd {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return PumpEnd::Cancelled,
                next = stream.next_text() => next,
            };
            match next {
                Some(Ok(text)) => self.route(&text),
                Some(Err(e)) => return PumpEnd::Lost(e),
                None => return PumpEnd::Lost(ChannelError::Closed),
            }
        }
    }

    fn route(&self, text: &str) {
        match frame::decode(text) {
            Ok(event) => {
                self.session.apply_push(event);
            }
            Err(e) => {
                warn!(
                    store_id = self.session.store_id(),
                    error = %e,
                    "Dropping malformed push frame"
                );
            }
        }
    }
}
