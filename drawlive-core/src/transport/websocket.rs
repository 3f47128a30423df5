//! Preferred transport: a persistent WebSocket stream.

use super::Transport;
use crate::error::{DrawLiveError, HandshakeError, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    ws: WsStream,
}

impl WebSocketTransport {
    /// Perform the upgrade handshake, presenting `credential` as a bearer token.
    pub async fn connect(
        url: &str,
        credential: &str,
        timeout: Duration,
    ) -> std::result::Result<Self, HandshakeError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| HandshakeError::capability(format!("invalid server URL: {e}")))?;

        let bearer = HeaderValue::from_str(&format!("Bearer {credential}"))
            .map_err(|_| HandshakeError::auth("credential is not a valid header value"))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws, _response) = tokio::time::timeout(timeout, connect_async(request))
            .await
            .map_err(|_| HandshakeError::network("WebSocket handshake timed out"))?
            .map_err(classify_handshake_error)?;

        tracing::debug!("WebSocket connected to {}", url);
        Ok(Self { ws })
    }
}

fn classify_handshake_error(err: WsError) -> HandshakeError {
    match err {
        WsError::Http(response) => {
            HandshakeError::from_status(response.status().as_u16(), "WebSocket upgrade")
        }
        WsError::Url(e) => HandshakeError::capability(format!("unsupported URL: {e}")),
        WsError::Protocol(e) => HandshakeError::capability(format!("protocol error: {e}")),
        WsError::Io(e) => HandshakeError::network(e.to_string()),
        other => HandshakeError::network(other.to_string()),
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> &'static str {
        "websocket"
    }

    async fn send(&mut self, text: String) -> Result<()> {
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| DrawLiveError::transport(format!("WebSocket send failed: {e}")))
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => {
                    return Some(String::from_utf8(bytes.to_vec()).map_err(|e| {
                        DrawLiveError::transport(format!("non UTF-8 binary frame: {e}"))
                    }))
                }
                Ok(Message::Close(frame)) => {
                    tracing::debug!("WebSocket closed by server: {:?}", frame);
                    return None;
                }
                // ping/pong are answered by tungstenite itself
                Ok(_) => continue,
                Err(WsError::ConnectionClosed) => return None,
                Err(e) => {
                    return Some(Err(DrawLiveError::transport(format!(
                        "WebSocket receive failed: {e}"
                    ))))
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.ws.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(DrawLiveError::transport(format!("WebSocket close failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn handshake(url: &str) -> HandshakeError {
        match WebSocketTransport::connect(url, "token", Duration::from_secs(5)).await {
            Ok(_) => panic!("{url} should not accept a WebSocket upgrade"),
            Err(e) => e,
        }
    }

    #[tokio::test]
    async fn test_rejected_upgrade_is_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/live"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let url = format!("ws://{}/live", server.address());
        assert!(matches!(handshake(&url).await, HandshakeError::Auth(_)));
    }

    #[tokio::test]
    async fn test_plain_http_endpoint_is_capability() {
        let server = MockServer::start().await;
        let url = format!("ws://{}/live", server.address());
        assert!(matches!(handshake(&url).await, HandshakeError::Capability(_)));
    }

    #[tokio::test]
    async fn test_unsupported_scheme_is_capability() {
        assert!(matches!(
            handshake("ftp://127.0.0.1/live").await,
            HandshakeError::Capability(_)
        ));
    }

    #[tokio::test]
    async fn test_refused_connection_is_network() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = format!("ws://{addr}/live");
        assert!(matches!(handshake(&url).await, HandshakeError::Network(_)));
    }
}
