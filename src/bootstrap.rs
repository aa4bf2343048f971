//! Authoritative pull of the pending queue on mount and on every reconnect.
//!
//! A successful load replaces the live queue (no merge), which recovers any
//! push events missed while disconnected. A failed load is logged and leaves
//! the last-known queue in place; the next reconnect retries.

use std::sync::Arc;
use tracing::{info, warn};

use crate::api::Backend;
use crate::error::ApiError;
use crate::session::Session;
use crate::store::QueueSnapshot;

pub struct BootstrapLoader {
    backend: Arc<dyn Backend>,
    store_id: i64,
}

impl BootstrapLoader {
    pub fn new(backend: Arc<dyn Backend>, store_id: i64) -> Self {
        Self { backend, store_id }
    }

    /// Fetch pending orders and calls. Both must succeed.
    pub async fn load(&self) -> Result<QueueSnapshot, ApiError> {
        let (orders, calls) = tokio::try_join!(
            self.backend.pending_orders(self.store_id),
            self.backend.pending_calls(self.store_id),
        )?;
        Ok(QueueSnapshot { orders, calls })
    }

    /// Load and replace the session's queue. Returns `true` on replace.
    pub async fn refresh(&self, session: &Session) -> bool {
        session.begin_bootstrap();
        match self.load().await {
            Ok(snapshot) => {
                let (orders, calls) = (snapshot.orders.len(), snapshot.calls.len());
                session.replace(snapshot);
                info!(
                    store_id = self.store_id,
                    orders, calls, "Pending queue loaded from backend"
                );
                true
            }
            Err(e) => {
                session.abort_bootstrap();
                warn!(
                    store_id = self.store_id,
                    error = %e,
                    "Bootstrap fetch failed; keeping last known queue"
                );
                false
            }
        }
    }
}
