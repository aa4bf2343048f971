//! Runtime configuration for the kitchen display.
//!
//! Resolution order: built-in defaults, then an optional JSON file, then
//! `TABLEORDER_*` environment variables. The result is validated before use.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::api::normalize_base_url;
use crate::channel::ReconnectPolicy;
use crate::error::ConfigError;

/// Port the backend serves its WebSocket endpoint on when the API URL names none.
pub const DEFAULT_WS_PORT: u16 = 8000;

pub const ENV_API_URL: &str = "TABLEORDER_API_URL";
pub const ENV_WS_URL: &str = "TABLEORDER_WS_URL";
pub const ENV_STORE_ID: &str = "TABLEORDER_STORE_ID";
pub const ENV_MODE: &str = "TABLEORDER_MODE";
pub const ENV_RECONNECT_SECS: &str = "TABLEORDER_RECONNECT_SECS";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Bootstrap plus the duplex push channel.
    #[default]
    Push,
    /// Periodic full refetch, no push channel.
    Polling,
}

impl std::str::FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "push" | "ws" | "websocket" => Ok(Mode::Push),
            "polling" | "poll" => Ok(Mode::Polling),
            other => Err(ConfigError::Invalid {
                key: "mode",
                message: format!("expected push or polling, got {other:?}"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub api_base_url: String,
    /// Derived from `api_base_url` when absent.
    pub ws_base_url: Option<String>,
    pub store_id: i64,
    pub request_timeout_secs: u64,
    pub reconnect: ReconnectPolicy,
    pub mode: Mode,
    pub poll_interval_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            ws_base_url: None,
            store_id: 0,
            request_timeout_secs: 30,
            reconnect: ReconnectPolicy::default(),
            mode: Mode::Push,
            poll_interval_secs: 15,
        }
    }
}

impl LiveConfig {
    /// Load from `path` (if given), apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        info!(
            api = %config.api_base_url,
            ws = config.ws_base_url.as_deref().unwrap_or_default(),
            store_id = config.store_id,
            mode = ?config.mode,
            "Configuration loaded"
        );
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Apply `TABLEORDER_*` overrides from `lookup`. Empty values are ignored.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_API_URL) {
            debug!(key = ENV_API_URL, "Config override");
            self.api_base_url = url;
        }
        if let Some(url) = get(ENV_WS_URL) {
            debug!(key = ENV_WS_URL, "Config override");
            self.ws_base_url = Some(url);
        }
        if let Some(id) = get(ENV_STORE_ID) {
            self.store_id = id.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "store_id",
                message: format!("not a number: {id:?}"),
            })?;
        }
        if let Some(mode) = get(ENV_MODE) {
            self.mode = mode.parse()?;
        }
        if let Some(secs) = get(ENV_RECONNECT_SECS) {
            let secs: u64 = secs.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "reconnect",
                message: format!("not a number of seconds: {secs:?}"),
            })?;
            self.reconnect = ReconnectPolicy::Fixed {
                delay_ms: secs.saturating_mul(1_000),
            };
        }
        Ok(())
    }

    /// Normalise URLs and check required settings.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.store_id <= 0 {
            return Err(ConfigError::Missing("store_id"));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::Missing("api_base_url"));
        }
        self.api_base_url = normalize_base_url(&self.api_base_url);
        reqwest::Url::parse(&self.api_base_url).map_err(|e| ConfigError::Invalid {
            key: "api_base_url",
            message: e.to_string(),
        })?;

        let ws = match self.ws_base_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ => derive_ws_url(&self.api_base_url)?,
        };
        if !(ws.starts_with("ws://") || ws.starts_with("wss://")) {
            return Err(ConfigError::Invalid {
                key: "ws_base_url",
                message: format!("expected a ws:// or wss:// URL, got {ws:?}"),
            });
        }
        self.ws_base_url = Some(ws);

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "request_timeout_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        let reconnect_problem = match self.reconnect {
            ReconnectPolicy::Fixed { delay_ms: 0 } => Some("delay_ms must be greater than zero"),
            ReconnectPolicy::CappedExponential { base_ms: 0, .. } => {
                Some("base_ms must be greater than zero")
            }
            ReconnectPolicy::CappedExponential { base_ms, max_ms } if max_ms < base_ms => {
                Some("max_ms must not be below base_ms")
            }
            _ => None,
        };
        if let Some(message) = reconnect_problem {
            return Err(ConfigError::Invalid {
                key: "reconnect",
                message: message.to_string(),
            });
        }
        if self.mode == Mode::Polling && self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "poll_interval_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// WebSocket base URL; derived from the API URL if not validated yet.
    pub fn ws_url(&self) -> Result<String, ConfigError> {
        match &self.ws_base_url {
            Some(url) => Ok(url.clone()),
            None => derive_ws_url(&self.api_base_url),
        }
    }
}

/// `http://host[:port]/...` -> `ws://host:port`, `https` -> `wss`. The port
/// defaults to [`DEFAULT_WS_PORT`].
pub fn derive_ws_url(api_base_url: &str) -> Result<String, ConfigError> {
    let invalid = |message: String| ConfigError::Invalid {
        key: "ws_base_url",
        message,
    };
    let mut url = reqwest::Url::parse(&normalize_base_url(api_base_url))
        .map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        _ => "ws",
    };
    if url.port().is_none() {
        url.set_port(Some(DEFAULT_WS_PORT))
            .map_err(|_| invalid(format!("cannot set port on {api_base_url}")))?;
    }
    url.set_scheme(scheme)
        .map_err(|_| invalid(format!("cannot derive {scheme} URL from {api_base_url}")))?;
    url.set_path("");
    url.set_query(None);
    Ok(url.as_str().trim_end_matches('/').to_string())
}
