//! Fallback transport: HTTP long-poll.
//!
//! `GET {base}/poll?cursor=N` returns `{"cursor": M, "messages": [..]}` and
//! `POST {base}/send` accepts one outbound message as JSON.

use super::Transport;
use crate::error::{DrawLiveError, HandshakeError, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct PollResponse {
    cursor: u64,
    #[serde(default)]
    messages: Vec<serde_json::Value>,
}

pub struct PollingTransport {
    http: reqwest::Client,
    base_url: String,
    bearer: String,
    cursor: u64,
    interval: Duration,
    buffered: VecDeque<String>,
    closed: bool,
}

impl PollingTransport {
    /// Open a long-poll session; the first poll doubles as the handshake.
    pub async fn connect(
        http: reqwest::Client,
        base_url: &str,
        credential: &str,
        interval: Duration,
        timeout: Duration,
    ) -> std::result::Result<Self, HandshakeError> {
        let mut transport = Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer: format!("Bearer {credential}"),
            cursor: 0,
            interval,
            buffered: VecDeque::new(),
            closed: false,
        };

        let response = transport
            .http
            .get(format!("{}/poll", transport.base_url))
            .query(&[("cursor", transport.cursor)])
            .header(AUTHORIZATION, &transport.bearer)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| HandshakeError::network(format!("long-poll handshake failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HandshakeError::from_status(status.as_u16(), "long-poll handshake"));
        }

        let body: PollResponse = response
            .json()
            .await
            .map_err(|e| HandshakeError::capability(format!("unexpected poll response: {e}")))?;
        transport.absorb(body);

        tracing::debug!("Long-poll session opened at {}", transport.base_url);
        Ok(transport)
    }

    fn absorb(&mut self, body: PollResponse) {
        self.cursor = body.cursor;
        self.buffered
            .extend(body.messages.into_iter().map(|m| m.to_string()));
    }

    async fn poll_once(&mut self) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/poll", self.base_url))
            .query(&[("cursor", self.cursor)])
            .header(AUTHORIZATION, &self.bearer)
            .send()
            .await
            .map_err(|e| DrawLiveError::network_connection(format!("poll failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DrawLiveError::transport(format!("poll returned HTTP {status}")));
        }

        let body: PollResponse = response
            .json()
            .await
            .map_err(|e| DrawLiveError::transport(format!("unexpected poll response: {e}")))?;
        self.absorb(body);
        Ok(())
    }
}

#[async_trait]
impl Transport for PollingTransport {
    fn kind(&self) -> &'static str {
        "long-poll"
    }

    async fn send(&mut self, text: String) -> Result<()> {
        if self.closed {
            return Err(DrawLiveError::transport("long-poll session is closed"));
        }

        let response = self
            .http
            .post(format!("{}/send", self.base_url))
            .header(AUTHORIZATION, &self.bearer)
            .header(CONTENT_TYPE, "application/json")
            .body(text)
            .send()
            .await
            .map_err(|e| DrawLiveError::network_connection(format!("send failed: {e}")))?;

        if !response.status().is_success() {
            return Err(DrawLiveError::transport(format!(
                "send returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            if let Some(message) = self.buffered.pop_front() {
                return Some(Ok(message));
            }
            if self.closed {
                return None;
            }
            if let Err(e) = self.poll_once().await {
                return Some(Err(e));
            }
            if self.buffered.is_empty() {
                tokio::time::sleep(self.interval).await;
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.buffered.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn open(server: &MockServer) -> std::result::Result<PollingTransport, HandshakeError> {
        PollingTransport::connect(
            reqwest::Client::new(),
            &server.uri(),
            "token",
            Duration::from_millis(10),
            Duration::from_secs(5),
        )
        .await
    }

    async fn handshake_error(status: u16) -> HandshakeError {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/poll"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        match open(&server).await {
            Ok(_) => panic!("handshake with HTTP {status} should fail"),
            Err(e) => e,
        }
    }

    #[tokio::test]
    async fn test_handshake_status_is_classified() {
        assert!(matches!(handshake_error(401).await, HandshakeError::Auth(_)));
        assert!(matches!(handshake_error(403).await, HandshakeError::Auth(_)));
        assert!(matches!(handshake_error(404).await, HandshakeError::Capability(_)));
        assert!(matches!(handshake_error(503).await, HandshakeError::Network(_)));
    }

    #[tokio::test]
    async fn test_handshake_rejects_unexpected_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/poll"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        assert!(matches!(open(&server).await, Err(HandshakeError::Capability(_))));
    }

    #[tokio::test]
    async fn test_messages_arrive_in_order_and_cursor_advances() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/poll"))
            .and(query_param("cursor", "0"))
            .and(header("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cursor": 5,
                "messages": [{ "event": "connected_ack" }, { "event": "heartbeat_ack" }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/poll"))
            .and(query_param("cursor", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cursor": 6,
                "messages": [{ "event": "snapshot", "payload": {} }]
            })))
            .mount(&server)
            .await;

        let mut transport = open(&server).await.unwrap();
        assert_eq!(transport.kind(), "long-poll");

        let mut received = Vec::new();
        for _ in 0..3 {
            let text = transport.recv().await.unwrap().unwrap();
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            received.push(value["event"].as_str().unwrap_or_default().to_string());
        }
        assert_eq!(received, vec!["connected_ack", "heartbeat_ack", "snapshot"]);
        assert_eq!(transport.cursor, 6);
    }

    #[tokio::test]
    async fn test_failed_poll_surfaces_as_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/poll"))
            .and(query_param("cursor", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "cursor": 2 })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/poll"))
            .and(query_param("cursor", "2"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut transport = open(&server).await.unwrap();
        assert!(matches!(transport.recv().await, Some(Err(_))));
    }

    #[tokio::test]
    async fn test_send_posts_json_and_close_stops_traffic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/poll"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "cursor": 0 })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(header("authorization", "Bearer token"))
            .and(body_json(json!({ "event": "heartbeat", "payload": {} })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut transport = open(&server).await.unwrap();
        transport
            .send(json!({ "event": "heartbeat", "payload": {} }).to_string())
            .await
            .unwrap();

        transport.close().await.unwrap();
        assert!(transport.send("{}".to_string()).await.is_err());
        assert!(transport.recv().await.is_none());
    }
}
