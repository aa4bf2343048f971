//! WebSocket push transport (`ws(s)://<host>/ws/<store_id>`).

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use super::{PushStream, PushTransport};
use crate::error::ChannelError;

pub struct WebSocketTransport {
    base_url: String,
}

impl WebSocketTransport {
    pub fn new(ws_base_url: &str) -> Self {
        Self {
            base_url: ws_base_url.trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn channel_url(&self, store_id: i64) -> String {
        format!("{}/ws/{store_id}", self.base_url)
    }
}

#[async_trait]
impl PushTransport for WebSocketTransport {
    async fn connect(&self, store_id: i64) -> Result<Box<dyn PushStream>, ChannelError> {
        let url = self.channel_url(store_id);
        let (inner, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::Handshake {
                url: url.clone(),
                message: e.to_string(),
            })?;
        info!(url = %url, status = response.status().as_u16(), "Push channel connected");
        Ok(Box::new(WsStream { inner }))
    }
}

struct WsStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushStream for WsStream {
    async fn next_text(&mut self) -> Option<Result<String, ChannelError>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Push channel close frame received");
                    return None;
                }
                // Pings are answered by tungstenite itself.
                Ok(_) => continue,
                Err(e) => return Some(Err(ChannelError::Transport(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.inner.close(None).await;
    }
}
