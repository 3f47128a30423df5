use thiserror::Error;

pub type Result<T> = std::result::Result<T, DrawLiveError>;

#[derive(Error, Debug)]
pub enum DrawLiveError {
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Network connection error: {0}")]
    NetworkConnection(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DrawLiveError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn network_connection(msg: impl Into<String>) -> Self {
        Self::NetworkConnection(msg.into())
    }
}

/// Why a connection handshake did not produce a usable transport.
///
/// The classification drives the session's recovery policy: `Auth` is
/// terminal, `Capability` may trigger the one-time fallback, and `Network`
/// is retried with backoff.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("credential rejected: {0}")]
    Auth(String),

    #[error("transport not supported: {0}")]
    Capability(String),

    #[error("network failure: {0}")]
    Network(String),
}

impl HandshakeError {
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn capability(msg: impl Into<String>) -> Self {
        Self::Capability(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Classify an HTTP status returned during a handshake.
    pub fn from_status(status: u16, context: &str) -> Self {
        match status {
            401 | 403 => Self::auth(format!("{context}: HTTP {status}")),
            500..=599 => Self::network(format!("{context}: HTTP {status}")),
            _ => Self::capability(format!("{context}: HTTP {status}")),
        }
    }
}
