//! Async driver that feeds a [`RevealMachine`] from the shared connection
//! and fans its updates out to subscribers.

use crate::machine::{RevealConfig, RevealMachine, RevealUpdate, Visibility};
use crate::slot::SlotKey;
use chrono::Utc;
use drawlive_core::{ConnectionHandle, ConnectionManager, DrawEvent, Station};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

const UPDATE_CHANNEL_CAPACITY: usize = 64;

enum Input {
    Event(DrawEvent),
    Visibility(Visibility),
}

/// A live reveal of one station's draw.
///
/// Holds a connection handle for as long as it runs; [`LiveDraw::close`] or
/// dropping the value releases it.
pub struct LiveDraw {
    station: Station,
    inputs: mpsc::UnboundedSender<Input>,
    updates: broadcast::Sender<RevealUpdate>,
    current: Arc<RwLock<RevealUpdate>>,
    task: Option<JoinHandle<()>>,
}

impl LiveDraw {
    /// Start revealing `station` over the manager's shared connection.
    pub fn watch(
        manager: &ConnectionManager,
        credential: impl Into<String>,
        station: Station,
        config: RevealConfig,
    ) -> Self {
        // subscribe before acquiring so the first snapshot cannot slip past
        let events = manager.subscribe_events();
        let handle = manager.acquire(credential, station.clone());
        Self::spawn(station, config, Some((handle, events)))
    }

    /// An engine fed only through [`LiveDraw::apply_event`], e.g. for replays.
    pub fn detached(station: Station, config: RevealConfig) -> Self {
        Self::spawn(station, config, None)
    }

    fn spawn(
        station: Station,
        config: RevealConfig,
        connection: Option<(ConnectionHandle, broadcast::Receiver<DrawEvent>)>,
    ) -> Self {
        let machine = RevealMachine::new(station.clone(), config);
        let current = Arc::new(RwLock::new(machine.snapshot()));
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let (inputs, inputs_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run(
            machine,
            connection,
            inputs_rx,
            updates.clone(),
            current.clone(),
        ));

        Self {
            station,
            inputs,
            updates,
            current,
            task: Some(task),
        }
    }

    pub fn station(&self) -> &Station {
        &self.station
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RevealUpdate> {
        self.updates.subscribe()
    }

    /// Invoke `callback` for every update until the returned guard is dropped.
    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&RevealUpdate) + Send + 'static,
    {
        let mut updates = self.updates.subscribe();
        let station = self.station.clone();
        let task = tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(update) => callback(&update),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("Subscriber for {} skipped {} updates", station, missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription { task }
    }

    pub fn current(&self) -> RevealUpdate {
        self.current.read().clone()
    }

    pub fn reveal_pointer(&self) -> Option<SlotKey> {
        self.current.read().pointer
    }

    /// Feed an event directly, bypassing the connection.
    pub fn apply_event(&self, event: DrawEvent) {
        if self.inputs.send(Input::Event(event)).is_err() {
            tracing::warn!("Reveal engine for {} has stopped", self.station);
        }
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        if self.inputs.send(Input::Visibility(visibility)).is_err() {
            tracing::warn!("Reveal engine for {} has stopped", self.station);
        }
    }

    /// Stop the engine and release its connection handle.
    pub async fn close(mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        task.abort();
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                tracing::warn!("Reveal engine for {} ended abnormally: {}", self.station, e);
            }
        }
    }
}

impl Drop for LiveDraw {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Guard returned by [`LiveDraw::on_change`].
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    mut machine: RevealMachine,
    connection: Option<(ConnectionHandle, broadcast::Receiver<DrawEvent>)>,
    mut inputs: mpsc::UnboundedReceiver<Input>,
    updates: broadcast::Sender<RevealUpdate>,
    current: Arc<RwLock<RevealUpdate>>,
) {
    let (handle, mut events) = match connection {
        Some((handle, events)) => (Some(handle), Some(events)),
        None => (None, None),
    };

    let publish = |update: Option<RevealUpdate>| {
        if let Some(update) = update {
            *current.write() = update.clone();
            // no subscribers is fine
            let _ = updates.send(update);
        }
    };

    loop {
        let deadline = machine.next_deadline();
        let timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            input = inputs.recv() => match input {
                Some(Input::Event(event)) => {
                    publish(machine.apply_event(event, Instant::now(), Utc::now()))
                }
                Some(Input::Visibility(visibility)) => {
                    publish(machine.set_visibility(visibility, Instant::now()))
                }
                None => break,
            },

            received = recv_event(&mut events) => match received {
                Ok(event) => {
                    let addressed = event.station().cloned();
                    match addressed {
                        Some(station) if station != *machine.station() => {}
                        Some(_) => publish(machine.apply_event(event, Instant::now(), Utc::now())),
                        None => {
                            let shared_by = handle.as_ref().map_or(0, |h| h.watched_station_count());
                            if shared_by > 1 {
                                tracing::debug!(
                                    "Field without a station applied to {} while {} stations share the connection",
                                    machine.station(),
                                    shared_by
                                );
                            }
                            publish(machine.apply_event(event, Instant::now(), Utc::now()));
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(
                        "Reveal engine for {} missed {} events, requesting latest",
                        machine.station(),
                        missed
                    );
                    if let Some(handle) = &handle {
                        handle.request_latest();
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("Event stream for {} closed", machine.station());
                    events = None;
                }
            },

            _ = timer => publish(machine.on_timer(Instant::now())),
        }
    }

    drop(handle);
}

async fn recv_event(
    events: &mut Option<broadcast::Receiver<DrawEvent>>,
) -> Result<DrawEvent, broadcast::error::RecvError> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
