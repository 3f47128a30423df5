use anyhow::{Context, Result};
use drawlive_core::ClientConfig;
use drawlive_reveal::RevealConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const TOKEN_ENV: &str = "DRAWLIVE_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub server_url: String,
    /// Long-poll base URL; derived from `server_url` when unset.
    pub poll_url: Option<String>,
    pub token: Option<String>,
    pub max_reconnect_attempts: Option<u32>,
    pub reveal: RevealConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            server_url: ClientConfig::default().server_url,
            poll_url: None,
            token: None,
            max_reconnect_attempts: None,
            reveal: RevealConfig::default(),
        }
    }
}

impl CliConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("drawlive")
            .join("config.json")
    }

    /// Load `path`, or the default location if it exists, or built-in defaults.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Self::default_path(), false),
        };

        if !required && !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn client_config(&self, server_override: Option<&str>) -> ClientConfig {
        let mut config = ClientConfig::new(server_override.unwrap_or(&self.server_url));
        if server_override.is_none() {
            if let Some(poll_url) = &self.poll_url {
                config.poll_url = poll_url.clone();
            }
        }
        if let Some(attempts) = self.max_reconnect_attempts {
            config.backoff.max_attempts = attempts;
        }
        config
    }

    /// Flag, then environment, then config file.
    pub fn resolve_token(&self, flag: Option<String>) -> Option<String> {
        flag.or_else(|| std::env::var(TOKEN_ENV).ok())
            .or_else(|| self.token.clone())
            .filter(|token| !token.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = CliConfig::from_json(
            r#"{ "server_url": "wss://results.example/live", "reveal": { "debounce_window": 80, "pointer_throttle": 300 } }"#,
        )
        .unwrap();

        assert_eq!(config.reveal.debounce_window, Duration::from_millis(80));
        assert!(config.token.is_none());

        let client = config.client_config(None);
        assert_eq!(client.server_url, "wss://results.example/live");
        assert_eq!(client.poll_url, "https://results.example/live");
    }

    #[test]
    fn test_server_flag_wins_over_file() {
        let config = CliConfig {
            poll_url: Some("http://poll.example/live".to_string()),
            max_reconnect_attempts: Some(3),
            ..CliConfig::default()
        };

        let client = config.client_config(Some("ws://other.example/live"));
        assert_eq!(client.server_url, "ws://other.example/live");
        assert_eq!(client.poll_url, "http://other.example/live");
        assert_eq!(client.backoff.max_attempts, 3);

        assert_eq!(config.client_config(None).poll_url, "http://poll.example/live");
    }

    #[test]
    fn test_token_flag_takes_precedence() {
        let config = CliConfig {
            token: Some("from-file".to_string()),
            ..CliConfig::default()
        };
        assert_eq!(
            config.resolve_token(Some("from-flag".to_string())).as_deref(),
            Some("from-flag")
        );
    }
}
