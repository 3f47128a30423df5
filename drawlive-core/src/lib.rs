//! drawlive core - the shared live-draw connection.
//!
//! This library owns the single event connection a process keeps to the
//! results server: reference counting across viewers, transport negotiation
//! with a one-time fallback, reconnection backoff and heartbeats. Draw data
//! arriving on the connection is republished as [`DrawEvent`]s.

pub mod config;
pub mod connection;
pub mod error;
pub mod transport;
pub mod types;

pub use config::{BackoffPolicy, ClientConfig};
pub use connection::{
    ConnectionErrorKind, ConnectionHandle, ConnectionManager, ConnectionNotice, ConnectionState,
    Phase,
};
pub use error::{DrawLiveError, HandshakeError, Result};
pub use transport::{Connector, Transport, TransportMode};
pub use types::{
    DrawEvent, DrawPayload, ErrorNoticeKind, FieldPayload, OutboundMessage, ServerMessage, Station,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryConnector;

    #[tokio::test(start_paused = true)]
    async fn test_manager_creation() {
        let connector = MemoryConnector::new();
        let _link = connector.accept();
        let manager =
            ConnectionManager::with_connector(ClientConfig::default(), connector.clone()).unwrap();
        let mut notices = manager.subscribe_notices();

        let handle = manager.acquire("token", Station::new("mien-bac"));
        assert_eq!(handle.station().as_str(), "mien-bac");
        assert!(matches!(
            notices.recv().await.unwrap(),
            ConnectionNotice::Connected { .. }
        ));
        assert_eq!(manager.state().phase, Phase::Connected);
    }
}
