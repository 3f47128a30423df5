//! The task that owns one network session from first handshake to teardown.
//!
//! All connection-state transitions after the initial acquire happen here,
//! one at a time, and only while this task's id is still the live session.

use super::state::{ConnectionErrorKind, ConnectionNotice, Phase};
use super::Shared;
use crate::error::HandshakeError;
use crate::transport::{Transport, TransportMode};
use crate::types::{ErrorNoticeKind, OutboundMessage, ServerMessage};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

enum DriveOutcome {
    Cancelled,
    AuthRejected(String),
    Lost(String),
}

enum FrameOutcome {
    Continue,
    AuthRejected(String),
    Disconnect(String),
}

pub(super) async fn run(
    shared: Arc<Shared>,
    id: u64,
    cancel: CancellationToken,
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
) {
    let policy = shared.config.backoff.clone();
    let mut mode = TransportMode::Preferred;
    let mut attempt: u32 = 0;

    loop {
        let credential = shared.with_session(id, |inner| {
            inner.state.phase = if attempt == 0 {
                Phase::Connecting
            } else {
                Phase::Reconnecting
            };
            inner.state.transport_mode = mode;
            inner.credential.clone()
        });
        let Some(credential) = credential else {
            return;
        };

        tracing::debug!("Session {} handshake ({} mode)", id, mode);
        let handshake = tokio::select! {
            _ = cancel.cancelled() => return,
            result = shared.connector.connect(mode, &credential) => result,
        };

        let failure = match handshake {
            Ok(transport) => {
                attempt = 0;
                match drive(&shared, id, &cancel, &mut outbound, transport, mode).await {
                    DriveOutcome::Cancelled => return,
                    DriveOutcome::AuthRejected(message) => {
                        fail(&shared, id, ConnectionErrorKind::Auth, message);
                        return;
                    }
                    DriveOutcome::Lost(reason) => reason,
                }
            }
            Err(HandshakeError::Auth(message)) => {
                fail(&shared, id, ConnectionErrorKind::Auth, message);
                return;
            }
            Err(HandshakeError::Capability(message)) if mode == TransportMode::Preferred => {
                tracing::warn!(
                    "Session {} handshake unsupported ({}), retrying with fallback negotiation",
                    id,
                    message
                );
                mode = TransportMode::Fallback;
                continue;
            }
            Err(e) => e.to_string(),
        };

        attempt += 1;
        if attempt > policy.max_attempts {
            fail(
                &shared,
                id,
                ConnectionErrorKind::Exhausted,
                format!(
                    "gave up after {} reconnect attempts, last failure: {}",
                    policy.max_attempts, failure
                ),
            );
            return;
        }

        let delay = policy.delay_for(attempt);
        let scheduled = shared.with_session(id, |inner| {
            inner.state.phase = Phase::Reconnecting;
            inner.state.reconnect_attempts = attempt;
        });
        if scheduled.is_none() {
            return;
        }

        tracing::warn!(
            "Session {} lost ({}), reconnect {}/{} in {:?}",
            id,
            failure,
            attempt,
            policy.max_attempts,
            delay
        );

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn drive(
    shared: &Shared,
    id: u64,
    cancel: &CancellationToken,
    outbound: &mut mpsc::UnboundedReceiver<OutboundMessage>,
    mut transport: Box<dyn Transport>,
    mode: TransportMode,
) -> DriveOutcome {
    let stations = shared.with_session(id, |inner| {
        inner.state.phase = Phase::Connected;
        inner.state.reconnect_attempts = 0;
        inner.stations.keys().cloned().collect::<Vec<_>>()
    });
    let Some(stations) = stations else {
        let _ = transport.close().await;
        return DriveOutcome::Cancelled;
    };

    tracing::info!(
        "Session {} connected over {} ({} mode)",
        id,
        transport.kind(),
        mode
    );

    for station in &stations {
        if let Err(e) = send(&mut *transport, &OutboundMessage::request_latest(station)).await {
            tracing::warn!("Failed to request latest draw for {}: {}", station, e);
        }
    }
    shared.notify(ConnectionNotice::Connected { mode });

    let period = shared.config.heartbeat_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => break DriveOutcome::Cancelled,

            Some(message) = outbound.recv() => {
                if let Err(e) = send(&mut *transport, &message).await {
                    tracing::warn!("Failed to send '{}': {}", message.event, e);
                }
            }

            _ = heartbeat.tick() => {
                // liveness only; a dead transport surfaces through recv
                if let Err(e) = send(&mut *transport, &OutboundMessage::heartbeat(Utc::now())).await {
                    tracing::warn!("Heartbeat failed on session {}: {}", id, e);
                }
            }

            incoming = transport.recv() => match incoming {
                Some(Ok(text)) => match handle_frame(shared, &text) {
                    FrameOutcome::Continue => {}
                    FrameOutcome::AuthRejected(message) => break DriveOutcome::AuthRejected(message),
                    FrameOutcome::Disconnect(reason) => break DriveOutcome::Lost(reason),
                },
                Some(Err(e)) => break DriveOutcome::Lost(e.to_string()),
                None => break DriveOutcome::Lost("transport closed by server".to_string()),
            },
        }
    };

    if let Err(e) = transport.close().await {
        tracing::debug!("Closing {} transport: {}", transport.kind(), e);
    }

    if let DriveOutcome::Lost(reason) = &outcome {
        let still_live = shared.with_session(id, |inner| {
            inner.state.phase = Phase::Disconnected;
        });
        if still_live.is_some() {
            shared.notify(ConnectionNotice::Disconnected {
                reason: reason.clone(),
            });
        }
    }

    outcome
}

async fn send(transport: &mut dyn Transport, message: &OutboundMessage) -> crate::Result<()> {
    let text = message.to_text()?;
    transport.send(text).await
}

fn handle_frame(shared: &Shared, text: &str) -> FrameOutcome {
    let message = match ServerMessage::from_text(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Dropping malformed frame: {}", e);
            return FrameOutcome::Continue;
        }
    };

    match message {
        ServerMessage::ConnectedAck { .. } => {
            tracing::debug!("Server acknowledged connection");
            FrameOutcome::Continue
        }
        ServerMessage::DisconnectNotice { reason } => FrameOutcome::Disconnect(reason),
        ServerMessage::ErrorNotice {
            kind: ErrorNoticeKind::Auth,
            message,
        } => FrameOutcome::AuthRejected(message),
        ServerMessage::ErrorNotice {
            kind: ErrorNoticeKind::Transient,
            message,
        } => {
            tracing::warn!("Server reported transient error: {}", message);
            shared.notify(ConnectionNotice::ConnectionError {
                kind: ConnectionErrorKind::Transient,
                message,
            });
            FrameOutcome::Continue
        }
        other => {
            if let Some(event) = other.into_draw_event() {
                shared.publish(event);
            }
            FrameOutcome::Continue
        }
    }
}

/// Enter the terminal `Failed` phase and report it once.
fn fail(shared: &Shared, id: u64, kind: ConnectionErrorKind, message: String) {
    let still_live = shared.with_session(id, |inner| {
        inner.state.phase = Phase::Failed;
    });
    if still_live.is_none() {
        return;
    }

    tracing::error!("Connection failed ({:?}): {}", kind, message);
    shared.notify(ConnectionNotice::ConnectionError { kind, message });
}
