//! Kitchen display facade consumed by the rendering layer.
//!
//! Owns one [`Session`] plus the background task feeding it (push channel
//! or polling loop) and exposes the operator actions.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::alarm::AudioPlayback;
use crate::api::{Backend, HttpBackend};
use crate::bootstrap::BootstrapLoader;
use crate::channel::{
    ChannelHandle, PushChannelManager, PushTransport, ReconnectPolicy, WebSocketTransport,
};
use crate::completion::CompletionGateway;
use crate::config::{LiveConfig, Mode};
use crate::error::{CompletionError, ConfigError};
use crate::events::DisplayEvent;
use crate::models::{AlarmState, CallId, ConnectionState, EntityKind, OrderId};
use crate::session::Session;
use crate::store::QueueSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayOptions {
    pub mode: Mode,
    pub reconnect: ReconnectPolicy,
    pub poll_interval: Duration,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Push,
            reconnect: ReconnectPolicy::default(),
            poll_interval: Duration::from_secs(15),
        }
    }
}

pub struct KitchenDisplay {
    session: Arc<Session>,
    backend: Arc<dyn Backend>,
    transport: Arc<dyn PushTransport>,
    completion: CompletionGateway,
    options: DisplayOptions,
    task: Mutex<Option<ChannelHandle>>,
}

impl KitchenDisplay {
    pub fn new(
        store_id: i64,
        backend: Arc<dyn Backend>,
        transport: Arc<dyn PushTransport>,
        playback: Arc<dyn AudioPlayback>,
        options: DisplayOptions,
    ) -> Self {
        Self {
            session: Arc::new(Session::new(store_id, playback)),
            completion: CompletionGateway::new(backend.clone()),
            backend,
            transport,
            options,
            task: Mutex::new(None),
        }
    }

    /// HTTP backend plus WebSocket transport as described by `config`.
    pub fn from_config(
        config: &LiveConfig,
        playback: Arc<dyn AudioPlayback>,
    ) -> Result<Self, ConfigError> {
        let backend = HttpBackend::new(&config.api_base_url, config.request_timeout()).map_err(
            |e| ConfigError::Invalid {
                key: "api_base_url",
                message: e.to_string(),
            },
        )?;
        let transport = WebSocketTransport::new(&config.ws_url()?);
        Ok(Self::new(
            config.store_id,
            Arc::new(backend),
            Arc::new(transport),
            playback,
            DisplayOptions {
                mode: config.mode,
                reconnect: config.reconnect,
                poll_interval: config.poll_interval(),
            },
        ))
    }

    fn task(&self) -> std::sync::MutexGuard<'_, Option<ChannelHandle>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mount: bootstrap and start the background feed. Calling it again while
    /// running is a no-op.
    pub fn start(&self) {
        let mut task = self.task();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let loader = BootstrapLoader::new(self.backend.clone(), self.session.store_id());
        let handle = match self.options.mode {
            Mode::Push => PushChannelManager::new(
                self.session.clone(),
                self.transport.clone(),
                loader,
                self.options.reconnect,
            )
            .spawn(),
            Mode::Polling => crate::polling::start_polling_loop(
                self.session.clone(),
                loader,
                self.options.poll_interval,
            ),
        };
        info!(
            store_id = self.session.store_id(),
            mode = ?self.options.mode,
            "Kitchen display started"
        );
        *task = Some(handle);
    }

    /// Teardown: close the channel, cancel any pending reconnect and stop audio.
    pub async fn shutdown(&self) {
        let handle = self.task().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        self.session.shutdown_alarm();
        info!(store_id = self.session.store_id(), "Kitchen display stopped");
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn store_id(&self) -> i64 {
        self.session.store_id()
    }

    pub fn queue(&self) -> QueueSnapshot {
        self.session.queue()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.connection_state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.session.watch_connection()
    }

    pub fn alarm_state(&self) -> AlarmState {
        self.session.alarm_state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DisplayEvent> {
        self.session.events().subscribe()
    }

    pub fn acknowledge_alarm(&self) {
        self.session.acknowledge_alarm();
    }

    /// Must be called from an operator gesture before the alarm can ring.
    pub fn authorize_audio(&self) -> bool {
        self.session.authorize_audio()
    }

    pub async fn complete_order(&self, order_id: OrderId) -> Result<(), CompletionError> {
        self.completion
            .complete(&self.session, EntityKind::Order, order_id)
            .await
    }

    pub async fn complete_call(&self, call_id: CallId) -> Result<(), CompletionError> {
        self.completion
            .complete(&self.session, EntityKind::Call, call_id)
            .await
    }
}
