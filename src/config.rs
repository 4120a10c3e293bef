use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// Top-level server configuration.
///
/// Loaded from the YAML file named by `WICKET_CONFIG` when set; the
/// `LISTEN` environment variable then overrides the listen address.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub max_start_line: usize,
    pub max_header_line: usize,
    pub max_headers: usize,
    pub max_body_size: u64,
    /// Seconds a connection may sit idle while waiting for a request.
    /// Zero disables the timeout.
    pub idle_timeout_secs: u64,
    pub max_ws_payload: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN.to_string(),
            max_start_line: 8192,
            max_header_line: 8192,
            max_headers: 100,
            max_body_size: 16 * 1024 * 1024,
            idle_timeout_secs: 60,
            max_ws_payload: 16 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

/// How a session's deadline moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expiry {
    /// Every access pushes the deadline out by the full timeout.
    #[default]
    Sliding,
    /// The deadline is fixed when the session is created.
    Absolute,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub timeout_secs: u64,
    pub expiry: Expiry,
    pub path: String,
    pub http_only: bool,
    pub secure: bool,
    pub sweep_interval_secs: u64,
    /// When set, cookie values carry an HMAC of the token.
    pub mac_secret: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "SID".to_string(),
            timeout_secs: 15 * 60,
            expiry: Expiry::Sliding,
            path: "/".to_string(),
            http_only: true,
            secure: false,
            sweep_interval_secs: 60,
            mac_secret: None,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Config {
    pub fn load() -> Self {
        let mut cfg = match std::env::var("WICKET_CONFIG") {
            Ok(path) => match Self::from_file(&path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "ignoring unreadable config file");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        };

        if let Ok(addr) = std::env::var("LISTEN") {
            cfg.server.listen_addr = addr;
        }
        cfg
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}
