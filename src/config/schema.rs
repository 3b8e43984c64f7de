//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a servekit
//! application. All types derive Serde traits for deserialization from
//! config files, and every record carries defaults so minimal files work.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Root configuration consumed by the server core.
///
/// Applications with their own settings embed this with `#[serde(flatten)]`
/// and implement [`AppConfiguration`].
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP server and listener settings.
    pub http_server: HttpServerConfig,

    /// WebSocket container settings.
    pub websocket: WebSocketConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Access to the server section of an application's configuration.
pub trait AppConfiguration: serde::de::DeserializeOwned + Send + Sync + 'static {
    fn server(&self) -> &ServerConfig;
}

impl AppConfiguration for ServerConfig {
    fn server(&self) -> &ServerConfig {
        self
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HttpServerConfig {
    /// Interface to bind (e.g., "0.0.0.0").
    pub host: String,

    /// Port to bind. Zero picks an ephemeral port.
    pub port: u16,

    /// Context path the application routes and WebSocket endpoints live under.
    pub root_context: String,

    /// Forward TRACE requests to the application instead of echoing them.
    pub pass_trace_request: bool,

    /// Allow TRACE requests at all.
    pub trace_enabled: bool,

    /// Expose request metrics on `<root_context>/metrics`.
    #[serde(alias = "jmx_enabled")]
    pub metrics_enabled: bool,

    /// Directory to serve static files from.
    pub static_resource_directory: Option<String>,

    /// Context path static files are served under.
    pub static_resource_context_root: Option<String>,

    /// Listener tuning. Absent means transport defaults.
    pub network_listener: Option<NetworkListenerConfig>,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            root_context: "/".to_string(),
            pass_trace_request: false,
            trace_enabled: false,
            metrics_enabled: false,
            static_resource_directory: None,
            static_resource_context_root: None,
            network_listener: None,
        }
    }
}

/// Network listener tuning.
///
/// Negative sizes, timeouts and counts mean "unlimited" or "disabled".
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NetworkListenerConfig {
    pub auth_pass_through_enabled: bool,

    /// Largest urlencoded form body accepted, in bytes.
    pub max_form_post_size: i64,

    /// Largest request body buffered by extractors, in bytes.
    pub max_buffered_post_size: i64,

    /// Accept `Transfer-Encoding: chunked` request bodies.
    pub chunking_enabled: bool,

    /// Per-request processing timeout in seconds.
    pub transaction_timeout_secs: i64,

    /// Largest request head accepted, in bytes.
    pub max_http_header_size: i64,

    /// Keep-alive idle timeout in seconds. Zero disables keep-alive.
    pub idle_timeout_secs: i64,

    /// Requests served per keep-alive connection.
    pub max_requests: i64,

    /// Terminate TLS on this listener. Requires `ssl_context`.
    pub secure: bool,

    pub ssl_context: Option<SslContextConfig>,

    pub ssl_engine: Option<SslEngineConfig>,

    pub compression: Option<CompressionConfig>,
}

impl Default for NetworkListenerConfig {
    fn default() -> Self {
        Self {
            auth_pass_through_enabled: false,
            max_form_post_size: 2 * 1024 * 1024,
            max_buffered_post_size: 2 * 1024 * 1024,
            chunking_enabled: true,
            transaction_timeout_secs: -1,
            max_http_header_size: 8192,
            idle_timeout_secs: 30,
            max_requests: 256,
            secure: false,
            ssl_context: None,
            ssl_engine: None,
            compression: None,
        }
    }
}

/// Key and trust store locations.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct SslContextConfig {
    /// PEM file holding the certificate chain and private key.
    pub key_store_file: String,
    pub key_store_pass: String,

    /// PEM file holding trusted CA certificates for client authentication.
    pub trust_store_file: String,
    pub trust_store_pass: String,
}

/// TLS engine policy.
///
/// The cipher and protocol lists only take effect when their `*_configured`
/// flag is set.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct SslEngineConfig {
    pub enabled_cipher_suites: Vec<String>,
    pub enabled_protocols: Vec<String>,
    pub cipher_configured: bool,
    pub protocol_configured: bool,
    pub client_mode: bool,
    pub need_client_auth: bool,
    pub want_client_auth: bool,
}

/// Response compression settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompressionConfig {
    /// One of `off`, `on`, `force` (case-insensitive).
    pub mode: String,

    /// Responses smaller than this are never compressed.
    pub min_size_bytes: u64,

    pub compressable_mime_types: BTreeSet<String>,

    pub no_compression_user_agents: BTreeSet<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            mode: "off".to_string(),
            min_size_bytes: 1024,
            compressable_mime_types: BTreeSet::new(),
            no_compression_user_agents: BTreeSet::new(),
        }
    }
}

/// WebSocket container configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Largest incoming message buffered per session, in bytes.
    pub incoming_buffer_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            incoming_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (trace, debug, info, warn, error).
    pub level: String,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
