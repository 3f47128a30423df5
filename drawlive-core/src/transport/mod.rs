pub mod memory;
pub mod polling;
pub mod websocket;

pub use memory::{MemoryConnector, MemoryLink, MemoryTransport};
pub use polling::PollingTransport;
pub use websocket::WebSocketTransport;

use crate::config::ClientConfig;
use crate::error::{HandshakeError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which negotiation the session is using.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportMode {
    /// Streaming WebSocket only.
    Preferred,
    /// WebSocket first, downgrading to HTTP long-poll when the upgrade fails.
    Fallback,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preferred => f.write_str("preferred"),
            Self::Fallback => f.write_str("fallback"),
        }
    }
}

/// A live, bidirectional text channel to the results server.
#[async_trait]
pub trait Transport: Send {
    /// Short name used in logs.
    fn kind(&self) -> &'static str;

    async fn send(&mut self, text: String) -> Result<()>;

    /// Next inbound frame; `None` once the server has closed the channel.
    async fn recv(&mut self) -> Option<Result<String>>;

    async fn close(&mut self) -> Result<()>;
}

/// Opens transports; the connection manager's only way to reach the network.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        mode: TransportMode,
        credential: &str,
    ) -> std::result::Result<Box<dyn Transport>, HandshakeError>;
}

/// Connector backed by real WebSocket and HTTP long-poll transports.
pub struct NetworkConnector {
    config: ClientConfig,
    http: reqwest::Client,
}

impl NetworkConnector {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Connector for NetworkConnector {
    async fn connect(
        &self,
        mode: TransportMode,
        credential: &str,
    ) -> std::result::Result<Box<dyn Transport>, HandshakeError> {
        let ws = WebSocketTransport::connect(
            &self.config.server_url,
            credential,
            self.config.handshake_timeout,
        )
        .await;

        match (mode, ws) {
            (_, Ok(transport)) => Ok(Box::new(transport)),
            (TransportMode::Preferred, Err(e)) => Err(e),
            (TransportMode::Fallback, Err(HandshakeError::Auth(msg))) => {
                Err(HandshakeError::Auth(msg))
            }
            (TransportMode::Fallback, Err(e)) => {
                tracing::warn!("WebSocket unavailable ({}), downgrading to long-poll", e);
                let transport = PollingTransport::connect(
                    self.http.clone(),
                    &self.config.poll_url,
                    credential,
                    self.config.poll_interval,
                    self.config.handshake_timeout,
                )
                .await?;
                Ok(Box::new(transport))
            }
        }
    }
}
