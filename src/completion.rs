//! "Mark done" for orders and service calls.
//!
//! The entity leaves the queue only after the backend acknowledges the
//! completion. A rejected completion keeps the entity visible and is handed
//! back to the operator, who decides whether to retry.

use std::sync::Arc;
use tracing::{info, warn};

use crate::api::Backend;
use crate::error::CompletionError;
use crate::events::DisplayEvent;
use crate::models::EntityKind;
use crate::session::Session;

pub struct CompletionGateway {
    backend: Arc<dyn Backend>,
}

impl CompletionGateway {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub async fn complete(
        &self,
        session: &Session,
        kind: EntityKind,
        id: i64,
    ) -> Result<(), CompletionError> {
        let result = match kind {
            EntityKind::Order => self.backend.complete_order(id).await,
            EntityKind::Call => self.backend.complete_call(id).await,
        };

        match result {
            Ok(()) => {
                // Removing an already-absent id (double click, racing
                // bootstrap) is a no-op.
                let removed = session.remove_completed(kind, id);
                info!(
                    store_id = session.store_id(),
                    kind = %kind,
                    id,
                    removed,
                    "Completion acknowledged"
                );
                Ok(())
            }
            Err(source) => {
                warn!(
                    store_id = session.store_id(),
                    kind = %kind,
                    id,
                    error = %source,
                    "Completion rejected; item stays in queue"
                );
                let err = CompletionError { kind, id, source };
                session.events().emit(DisplayEvent::CompletionFailed {
                    kind,
                    id,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }
}
