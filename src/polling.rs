//! Polling fallback for deployments without the push channel.
//!
//! Each tick refetches the pending queue and diffs it against the session by
//! identity. Identities never seen before ring the alarm exactly like a push
//! insert; identities gone from the snapshot are dropped.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bootstrap::BootstrapLoader;
use crate::channel::ChannelHandle;
use crate::models::ConnectionState;
use crate::session::Session;

/// Start the polling loop. The first fetch replaces the queue without
/// ringing, like a mount bootstrap.
pub fn start_polling_loop(
    session: Arc<Session>,
    loader: BootstrapLoader,
    interval: Duration,
) -> ChannelHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let task = tokio::spawn(async move {
        let store_id = session.store_id();
        info!(store_id, interval_secs = interval.as_secs(), "Polling loop started");
        let mut primed = false;

        loop {
            if !primed {
                let loaded = tokio::select! {
                    _ = token.cancelled() => {
                        session.abort_bootstrap();
                        break;
                    }
                    ok = loader.refresh(&session) => ok,
                };
                primed = loaded;
                session.set_connection_state(connection_for(loaded));
            } else {
                session.begin_bootstrap();
                let result = tokio::select! {
                    _ = token.cancelled() => {
                        session.abort_bootstrap();
                        break;
                    }
                    result = loader.load() => result,
                };
                match result {
                    Ok(snapshot) => {
                        let diff = session.reconcile_snapshot(snapshot);
                        if !diff.is_empty() {
                            debug!(
                                store_id,
                                inserted = diff.inserted.len(),
                                removed = diff.removed.len(),
                                "Poll changed the queue"
                            );
                        }
                        session.set_connection_state(ConnectionState::Connected);
                    }
                    Err(e) => {
                        session.abort_bootstrap();
                        warn!(store_id, error = %e, "Poll failed; keeping last known queue");
                        session.set_connection_state(ConnectionState::Disconnected);
                    }
                }
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        session.set_connection_state(ConnectionState::Disconnected);
        info!(store_id, "Polling loop stopped");
    });

    ChannelHandle::new(cancel, task)
}

fn connection_for(reachable: bool) -> ConnectionState {
    if reachable {
        ConnectionState::Connected
    } else {
        ConnectionState::Disconnected
    }
}
