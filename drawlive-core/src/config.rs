use crate::error::{DrawLiveError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket endpoint of the results server.
    pub server_url: String,
    /// Base URL of the long-poll endpoints used after a transport fallback.
    pub poll_url: String,
    pub handshake_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
    pub event_channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Fraction of the delay added or removed at random, 0.0 to 1.0.
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 8,
            jitter_factor: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt `attempt` (1-based), without jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }

    /// Delay before reconnect attempt `attempt` with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let delay = self.base_delay_for(attempt);
        if self.jitter_factor <= 0.0 {
            return delay;
        }
        let spread = self.jitter_factor.min(1.0);
        let factor = rand::rng().random_range((1.0 - spread)..=(1.0 + spread));
        delay.mul_f64(factor).min(self.max_delay)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8080/live".to_string(),
            poll_url: "http://localhost:8080/live".to_string(),
            handshake_timeout: Duration::from_secs(10),
            backoff: BackoffPolicy::default(),
            heartbeat_interval: Duration::from_secs(25),
            poll_interval: Duration::from_secs(2),
            event_channel_capacity: 256,
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        let server_url = server_url.into();
        let poll_url = derive_poll_url(&server_url);
        Self {
            server_url,
            poll_url,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_url.is_empty() {
            return Err(DrawLiveError::config("Server URL cannot be empty"));
        }

        if self.poll_url.is_empty() {
            return Err(DrawLiveError::config("Poll URL cannot be empty"));
        }

        if self.backoff.base_delay.is_zero() {
            return Err(DrawLiveError::config("Base reconnect delay must be greater than 0"));
        }

        if self.backoff.max_delay < self.backoff.base_delay {
            return Err(DrawLiveError::config(
                "Max reconnect delay must not be below the base delay",
            ));
        }

        if !(0.0..=1.0).contains(&self.backoff.jitter_factor) {
            return Err(DrawLiveError::config("Jitter factor must be within 0.0..=1.0"));
        }

        if self.heartbeat_interval.is_zero() || self.poll_interval.is_zero() {
            return Err(DrawLiveError::config("Heartbeat and poll intervals must be non-zero"));
        }

        if self.event_channel_capacity == 0 {
            return Err(DrawLiveError::config("Event channel capacity must be greater than 0"));
        }

        Ok(())
    }
}

/// `ws://host/live` -> `http://host/live`, `wss://` -> `https://`.
fn derive_poll_url(server_url: &str) -> String {
    if let Some(rest) = server_url.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        server_url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            max_attempts: 5,
            jitter_factor: 0.0,
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(3));
        assert_eq!(policy.delay_for(40), Duration::from_secs(3));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = BackoffPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay_for(2);
            assert!(delay >= Duration::from_millis(1600));
            assert!(delay <= Duration::from_millis(2400));
        }
    }

    #[test]
    fn test_poll_url_derived_from_server_url() {
        let config = ClientConfig::new("wss://results.example/live");
        assert_eq!(config.poll_url, "https://results.example/live");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ClientConfig::default();
        config.server_url.clear();
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.backoff.max_delay = Duration::from_millis(10);
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.event_channel_capacity = 0;
        assert!(config.validate().is_err());
    }
}
