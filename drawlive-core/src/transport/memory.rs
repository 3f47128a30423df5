//! In-process transport for replaying recorded sessions without a server.
//!
//! A [`MemoryConnector`] hands out pre-arranged handshake outcomes in order.
//! Each successful outcome is a [`MemoryTransport`] whose server side is held
//! by a [`MemoryLink`]: frames pushed on the link arrive at the client, frames
//! the client sends are recorded on the link.

use super::{Connector, Transport, TransportMode};
use crate::error::{DrawLiveError, HandshakeError, Result};
use crate::types::{OutboundMessage, ServerMessage};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct MemoryTransport {
    incoming: mpsc::UnboundedReceiver<String>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

/// Server side of a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryLink {
    to_client: mpsc::UnboundedSender<String>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryTransport {
    pub fn pair() -> (Self, MemoryLink) {
        let (to_client, incoming) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        let link = MemoryLink {
            to_client,
            sent,
            closed,
        };
        (transport, link)
    }
}

impl MemoryLink {
    pub fn push(&self, message: &ServerMessage) -> Result<()> {
        self.push_text(message.to_text()?)
    }

    pub fn push_text(&self, text: impl Into<String>) -> Result<()> {
        self.to_client
            .send(text.into())
            .map_err(|_| DrawLiveError::transport("client side of the link is gone"))
    }

    /// Outbound messages the client has sent, in order.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    /// Whether the client closed its end.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn send(&mut self, text: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DrawLiveError::transport("memory transport is closed"));
        }
        self.sent.lock().push(text);
        Ok(())
    }

    /// Ends once every [`MemoryLink`] clone has been dropped.
    async fn recv(&mut self) -> Option<Result<String>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.incoming.close();
        Ok(())
    }
}

#[derive(Default)]
struct Script {
    outcomes: VecDeque<std::result::Result<MemoryTransport, HandshakeError>>,
    attempts: Vec<(TransportMode, String)>,
}

/// Connector that plays back queued handshake outcomes.
///
/// When the queue is empty every further handshake fails with a network
/// error, so the session falls into its normal backoff path.
#[derive(Default)]
pub struct MemoryConnector {
    script: Mutex<Script>,
}

impl MemoryConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a successful handshake and return the server side of it.
    pub fn accept(&self) -> MemoryLink {
        let (transport, link) = MemoryTransport::pair();
        self.script.lock().outcomes.push_back(Ok(transport));
        link
    }

    /// Queue a failed handshake.
    pub fn reject(&self, error: HandshakeError) {
        self.script.lock().outcomes.push_back(Err(error));
    }

    /// Modes of every handshake attempted so far.
    pub fn attempts(&self) -> Vec<TransportMode> {
        self.script.lock().attempts.iter().map(|(mode, _)| *mode).collect()
    }

    /// Credentials presented by every handshake attempted so far.
    pub fn credentials(&self) -> Vec<String> {
        self.script
            .lock()
            .attempts
            .iter()
            .map(|(_, credential)| credential.clone())
            .collect()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        mode: TransportMode,
        credential: &str,
    ) -> std::result::Result<Box<dyn Transport>, HandshakeError> {
        let outcome = {
            let mut script = self.script.lock();
            script.attempts.push((mode, credential.to_string()));
            script.outcomes.pop_front()
        };

        match outcome {
            Some(Ok(transport)) => Ok(Box::new(transport)),
            Some(Err(e)) => Err(e),
            None => Err(HandshakeError::network("no scripted handshake left")),
        }
    }
}
