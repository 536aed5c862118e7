//! Configuration schema definitions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GsCoreConfig {
    /// WebSocket server adapters connect to.
    #[serde(default)]
    pub server: ServerConfig,

    /// Adapter-side reconnecting client.
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Plugin settings persistence.
    #[serde(default)]
    pub store: StoreConfig,
}

// =============================================================================
// Server / Client
// =============================================================================

/// WebSocket server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Route prefix; adapters connect to `{path}/{bot_id}`.
    #[serde(default = "default_ws_path")]
    pub path: String,

    /// Outgoing frames buffered per connection.
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_ws_path(),
            send_buffer: default_send_buffer(),
        }
    }
}

#[cfg(feature = "ws-server")]
impl ServerConfig {
    /// Converts to the transport-level server settings.
    pub fn to_transport_config(&self) -> gscore_transport::WsServerConfig {
        gscore_transport::WsServerConfig {
            host: self.host.clone(),
            port: self.port,
            path: self.path.clone(),
            send_buffer: self.send_buffer,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_send_buffer() -> usize {
    256
}

/// Reconnecting WebSocket client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server URL to connect to, including the bot id path segment.
    #[serde(default = "default_client_url")]
    pub url: String,

    /// Constant delay between reconnect attempts, in seconds.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Timeout for one connection attempt, in seconds.
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,

    /// Largest accepted frame, in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Outgoing frames buffered while disconnected.
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_client_url(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            open_timeout_secs: default_open_timeout_secs(),
            max_frame_size: default_max_frame_size(),
            send_buffer: default_send_buffer(),
        }
    }
}

impl ClientConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }
}

#[cfg(feature = "ws-client")]
impl ClientConfig {
    /// Converts to the transport-level client settings.
    pub fn to_transport_config(&self) -> gscore_transport::WsClientConfig {
        gscore_transport::WsClientConfig {
            url: self.url.clone(),
            reconnect_delay: self.reconnect_delay(),
            open_timeout: self.open_timeout(),
            max_frame_size: self.max_frame_size,
            send_buffer: self.send_buffer,
        }
    }
}

fn default_client_url() -> String {
    "ws://127.0.0.1:8765/ws/Bot".to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_open_timeout_secs() -> u64 {
    10
}

fn default_max_frame_size() -> usize {
    2_usize.pow(30)
}

// =============================================================================
// Store
// =============================================================================

/// Where plugin and service-module settings are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Persist settings to disk. When off, settings live in memory only.
    #[serde(default = "default_persist")]
    pub persist: bool,

    /// JSON file holding the settings. Defaults to the user config directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            persist: default_persist(),
            path: None,
        }
    }
}

impl StoreConfig {
    /// The settings file in effect.
    pub fn resolve_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        dirs::config_dir()
            .map(|dir| dir.join("gscore"))
            .unwrap_or_else(|| PathBuf::from("data"))
            .join("plugins.json")
    }
}

fn default_persist() -> bool {
    true
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to `Full` without it.
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Log file, used when `output` is `file`.
    pub file_path: Option<PathBuf>,
    /// Per-module levels, e.g. `gscore_transport = "debug"`.
    pub filters: HashMap<String, LogLevel>,
    pub span_events: SpanEventConfig,
    pub thread_ids: bool,
    /// Include file names and line numbers.
    pub file_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            filters: HashMap::new(),
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GsCoreConfig::default();
        assert_eq!(config.server.port, 8765);
        assert_eq!(config.server.path, "/ws");
        assert_eq!(config.client.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.store.persist);
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let config: GsCoreConfig = serde_json::from_str(
            r#"{"server":{"port":9000},"logging":{"level":"debug","format":"pretty"}}"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.client.max_frame_size, 1 << 30);
    }

    #[test]
    fn explicit_store_path_wins() {
        let store = StoreConfig {
            persist: true,
            path: Some(PathBuf::from("/tmp/gs/plugins.json")),
        };
        assert_eq!(store.resolve_path(), PathBuf::from("/tmp/gs/plugins.json"));
        assert!(StoreConfig::default().resolve_path().ends_with("plugins.json"));
    }
}
