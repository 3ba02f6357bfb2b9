//! Configuration parsing for the CEX.IO client.
//!
//! Settings are read from a single JSON file. The top-level structure carries
//! logging metadata and one `connection` block with credentials, endpoints,
//! and timing. Every connection field has a production default, so a public
//! client needs no `connection` block at all.
//!
//! # Example config
//!
//! ```json
//! {
//!   "CexClient": { "module_name": "cex", "log_path": "/tmp/log" },
//!   "connection": {
//!     "api_key": "...",
//!     "secret_key": "...",
//!     "request_timeout_ms": 30000,
//!     "ping_interval_secs": 15
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::error::CexError;

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Module metadata (name, log path, level).
    #[serde(rename = "CexClient", default)]
    pub meta: Option<ModuleMeta>,

    /// Connection settings shared by the WebSocket and REST clients.
    #[serde(default)]
    pub connection: ConnectionConfig,
}

impl AppConfig {
    /// Returns the module name, defaulting to `"cex"`.
    pub fn module_name(&self) -> String {
        self.meta
            .as_ref()
            .and_then(|m| m.module_name.clone())
            .unwrap_or_else(|| "cex".to_string())
    }

    /// Returns the log path.
    pub fn log_path(&self) -> Option<String> {
        self.meta.as_ref().and_then(|m| m.log_path.clone())
    }

    /// Returns the configured default log level, if any.
    pub fn log_level(&self) -> Option<String> {
        self.meta.as_ref().and_then(|m| m.log_level.clone())
    }
}

/// Module metadata block.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
    pub log_level: Option<String>,
}

/// Credentials, endpoints, and timing for one CEX.IO account.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// API key (sent in the auth handshake).
    #[serde(default)]
    pub api_key: String,

    /// API secret (HMAC-SHA256 signing).
    #[serde(default)]
    pub secret_key: String,

    // -- Endpoints --
    /// Private (authenticated) WebSocket URL.
    #[serde(default = "default_private_ws_url")]
    pub private_ws_url: String,

    /// Public WebSocket URL.
    #[serde(default = "default_public_ws_url")]
    pub public_ws_url: String,

    /// Public REST base URL.
    #[serde(default = "default_rest_url")]
    pub rest_url: String,

    /// Extra HTTP headers for the WebSocket handshake.
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,

    // -- Timing --
    /// Reply window for correlated calls and the auth handshake (milliseconds).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Outbound `{"e":"ping"}` interval in seconds (0 = disabled).
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            private_ws_url: default_private_ws_url(),
            public_ws_url: default_public_ws_url(),
            rest_url: default_rest_url(),
            extra_headers: HashMap::new(),
            request_timeout_ms: default_request_timeout_ms(),
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

impl ConnectionConfig {
    /// Reply window for correlated calls.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Heartbeat interval, `None` when disabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }

    /// Whether both halves of the API credentials are present.
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.secret_key.is_empty()
    }

    /// Check endpoint schemes and, when `private` is set, credentials.
    pub fn validate(&self, private: bool) -> Result<(), CexError> {
        check_url(&self.private_ws_url, &["ws", "wss"])?;
        check_url(&self.public_ws_url, &["ws", "wss"])?;
        check_url(&self.rest_url, &["http", "https"])?;
        if self.request_timeout_ms == 0 {
            return Err(CexError::Config("request_timeout_ms must be positive".into()));
        }
        if private && !self.has_credentials() {
            return Err(CexError::Config(
                "api_key and secret_key are required for a private client".into(),
            ));
        }
        Ok(())
    }
}

fn check_url(raw: &str, schemes: &[&str]) -> Result<(), CexError> {
    let parsed = url::Url::parse(raw).map_err(|e| CexError::Config(format!("invalid url '{raw}': {e}")))?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(CexError::Config(format!(
            "url '{raw}' must use one of {schemes:?}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Defaults (used by serde)
// ---------------------------------------------------------------------------

fn default_private_ws_url() -> String {
    "wss://trade.cex.io/api/spot/ws".into()
}

fn default_public_ws_url() -> String {
    "wss://trade.cex.io/api/spot/ws-public".into()
}

fn default_rest_url() -> String {
    "https://trade.cex.io/api/spot/rest-public".into()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_ping_interval_secs() -> u64 {
    15
}

/// Load and parse a JSON config file.
pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: AppConfig = serde_json::from_str(&content).context("failed to parse config")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.module_name(), "cex");
        assert_eq!(config.connection.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.connection.ping_interval(), Some(Duration::from_secs(15)));
        assert!(config.connection.validate(false).is_ok());
    }

    #[test]
    fn private_validation_requires_credentials() {
        let config = ConnectionConfig::default();
        assert!(matches!(config.validate(true), Err(CexError::Config(_))));

        let config = ConnectionConfig {
            api_key: "key".into(),
            secret_key: "secret".into(),
            ..ConnectionConfig::default()
        };
        assert!(config.validate(true).is_ok());
    }

    #[test]
    fn rejects_wrong_scheme() {
        let config = ConnectionConfig {
            public_ws_url: "https://trade.cex.io/api/spot/ws-public".into(),
            ..ConnectionConfig::default()
        };
        assert!(matches!(config.validate(false), Err(CexError::Config(_))));
    }

    #[test]
    fn zero_ping_interval_disables_heartbeat() {
        let json = r#"{
            "CexClient": { "module_name": "cex_md", "log_level": "debug" },
            "connection": { "ping_interval_secs": 0, "request_timeout_ms": 500 }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.module_name(), "cex_md");
        assert_eq!(config.log_level().as_deref(), Some("debug"));
        assert_eq!(config.connection.ping_interval(), None);
        assert_eq!(config.connection.request_timeout(), Duration::from_millis(500));
    }
}
