//! The process-wide, reference-counted connection to the results server.
//!
//! Every viewer calls [`ConnectionManager::acquire`] and gets a
//! [`ConnectionHandle`]. Only the first acquire opens the network session
//! and only the last release closes it; everything in between just adjusts
//! the count and the set of watched stations.

mod session;
pub mod state;

pub use state::{ConnectionErrorKind, ConnectionNotice, ConnectionState, Phase};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::transport::{Connector, NetworkConnector};
use crate::types::{DrawEvent, OutboundMessage, Station};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    inner: Mutex<Inner>,
    notices: broadcast::Sender<ConnectionNotice>,
    events: broadcast::Sender<DrawEvent>,
    next_session: AtomicU64,
}

struct Inner {
    state: ConnectionState,
    credential: String,
    stations: HashMap<Station, usize>,
    session: Option<SessionSlot>,
}

/// Control side of the running session task.
struct SessionSlot {
    id: u64,
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
}

impl ConnectionManager {
    /// Manager that talks to the network described by `config`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let connector = Arc::new(NetworkConnector::new(config.clone()));
        Self::with_connector(config, connector)
    }

    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;

        let (notices, _) = broadcast::channel(config.event_channel_capacity);
        let (events, _) = broadcast::channel(config.event_channel_capacity);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                connector,
                inner: Mutex::new(Inner {
                    state: ConnectionState::default(),
                    credential: String::new(),
                    stations: HashMap::new(),
                    session: None,
                }),
                notices,
                events,
                next_session: AtomicU64::new(1),
            }),
        })
    }

    /// Register interest in `station`.
    ///
    /// The 0→1 transition starts the network session in the background;
    /// progress is reported through [`subscribe_notices`](Self::subscribe_notices).
    /// The credential is used for this and every later handshake until
    /// another acquire supplies a new one. Must be called from within a
    /// tokio runtime.
    pub fn acquire(&self, credential: impl Into<String>, station: Station) -> ConnectionHandle {
        self.shared.acquire(credential.into(), &station);
        ConnectionHandle {
            id: Uuid::new_v4(),
            station,
            shared: Arc::clone(&self.shared),
            released: false,
        }
    }

    /// Give a handle back. Equivalent to dropping it.
    pub fn release(&self, handle: ConnectionHandle) {
        handle.release();
    }

    /// Forward a message to the server; dropped with a warning unless connected.
    pub fn send(&self, event: &str, payload: serde_json::Value) {
        self.shared.send(OutboundMessage::new(event, payload));
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state.clone()
    }

    /// Whether a network session is currently owned by this manager.
    pub fn is_open(&self) -> bool {
        self.shared.inner.lock().session.is_some()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<ConnectionNotice> {
        self.shared.notices.subscribe()
    }

    /// Draw data received from the server, for every watched station.
    pub fn subscribe_events(&self) -> broadcast::Receiver<DrawEvent> {
        self.shared.events.subscribe()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Stations with at least one live acquisition, sorted.
    pub fn watched_stations(&self) -> Vec<Station> {
        self.shared.watched_stations()
    }
}

/// Proof of one acquisition. Dropping it releases the acquisition.
pub struct ConnectionHandle {
    id: Uuid,
    station: Station,
    shared: Arc<Shared>,
    released: bool,
}

impl ConnectionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn station(&self) -> &Station {
        &self.station
    }

    pub fn send(&self, event: &str, payload: serde_json::Value) {
        self.shared.send(OutboundMessage::new(event, payload));
    }

    /// Number of distinct stations sharing this connection.
    pub fn watched_station_count(&self) -> usize {
        self.shared.inner.lock().stations.len()
    }

    /// Ask the server for the current record of this handle's station.
    pub fn request_latest(&self) {
        self.shared.send(OutboundMessage::request_latest(&self.station));
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.shared.release(&self.station);
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("station", &self.station)
            .field("released", &self.released)
            .finish()
    }
}

impl Shared {
    fn acquire(self: &Arc<Self>, credential: String, station: &Station) {
        let mut inner = self.inner.lock();
        inner.state.ref_count += 1;
        inner.credential = credential;
        *inner.stations.entry(station.clone()).or_default() += 1;

        tracing::debug!(
            "Acquired connection for station {} (refs: {})",
            station,
            inner.state.ref_count
        );

        if inner.state.ref_count == 1 {
            self.start_session(&mut inner);
        } else if inner.state.phase == Phase::Connected {
            if let Some(session) = &inner.session {
                let _ = session.outbound.send(OutboundMessage::request_latest(station));
            }
        }
    }

    fn start_session(self: &Arc<Self>, inner: &mut Inner) {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        inner.state = ConnectionState {
            phase: Phase::Connecting,
            ref_count: inner.state.ref_count,
            ..ConnectionState::default()
        };
        inner.session = Some(SessionSlot {
            id,
            cancel: cancel.clone(),
            outbound: outbound_tx,
        });

        tracing::info!("Opening connection session {}", id);
        tokio::spawn(session::run(Arc::clone(self), id, cancel, outbound_rx));
    }

    fn release(&self, station: &Station) {
        let mut inner = self.inner.lock();
        if inner.state.ref_count == 0 {
            tracing::warn!("Release without a matching acquire for station {}", station);
            return;
        }

        inner.state.ref_count -= 1;
        if let Some(count) = inner.stations.get_mut(station) {
            *count -= 1;
            if *count == 0 {
                inner.stations.remove(station);
            }
        }

        tracing::debug!(
            "Released connection for station {} (refs: {})",
            station,
            inner.state.ref_count
        );

        if inner.state.ref_count == 0 {
            if let Some(session) = inner.session.take() {
                session.cancel.cancel();
                tracing::info!("Closing connection session {}", session.id);
            }
            inner.state = ConnectionState::default();
        }
    }

    fn send(&self, message: OutboundMessage) {
        let inner = self.inner.lock();
        if inner.state.phase != Phase::Connected {
            tracing::warn!(
                "Dropping outbound '{}' while {}",
                message.event,
                inner.state.phase
            );
            return;
        }

        if let Some(session) = &inner.session {
            if session.outbound.send(message).is_err() {
                tracing::warn!("Session task is gone; outbound message dropped");
            }
        }
    }

    /// Run `f` against the state only if `session_id` is still the live session.
    fn with_session<R>(&self, session_id: u64, f: impl FnOnce(&mut Inner) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        match &inner.session {
            Some(session) if session.id == session_id => Some(f(&mut inner)),
            _ => None,
        }
    }

    fn watched_stations(&self) -> Vec<Station> {
        let mut stations: Vec<Station> = self.inner.lock().stations.keys().cloned().collect();
        stations.sort();
        stations
    }

    fn notify(&self, notice: ConnectionNotice) {
        // no subscribers is fine
        let _ = self.notices.send(notice);
    }

    fn publish(&self, event: DrawEvent) {
        let _ = self.events.send(event);
    }
}
