use crate::transport::TransportMode;
use serde::Serialize;
use std::fmt;

/// Lifecycle phase of the shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub phase: Phase,
    pub ref_count: usize,
    pub transport_mode: TransportMode,
    pub reconnect_attempts: u32,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            ref_count: 0,
            transport_mode: TransportMode::Preferred,
            reconnect_attempts: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionErrorKind {
    /// Credential rejected; terminal.
    Auth,
    /// Reconnect attempts used up; terminal.
    Exhausted,
    /// Server reported a recoverable problem; the session carries on.
    Transient,
}

impl ConnectionErrorKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Auth | Self::Exhausted)
    }
}

/// Lifecycle notification published to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionNotice {
    Connected {
        mode: TransportMode,
    },
    Disconnected {
        reason: String,
    },
    ConnectionError {
        kind: ConnectionErrorKind,
        message: String,
    },
}
