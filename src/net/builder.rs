//! Listener assembly from configuration.
//!
//! # Responsibilities
//! - Translate `HttpServerConfig` into a `ListenerSettings` descriptor
//! - Apply scalar limits, keep-alive, TLS and compression in a fixed order
//! - Reject configurations that cannot be served (fail fast)
//!
//! # Design Decisions
//! - Pure: no I/O and no binding happens here
//! - An absent sub-section skips its stage and leaves transport defaults
//! - Negative limits mean "unlimited" and become `None`

use std::time::Duration;

use crate::config::{HttpServerConfig, NetworkListenerConfig};
use crate::http::websocket::WebSocketAddOn;
use crate::net::compression::{CompressionPolicy, UnknownCompressionMode};
use crate::net::tls::TlsPolicy;

/// Smallest request-head buffer the HTTP/1 transport accepts.
pub const MIN_HEADER_BUFFER: usize = 8192;

/// Fatal listener configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ListenerConfigError {
    #[error("configuration error: secure set to true and ssl_context is missing")]
    MissingSslContext,
    #[error("configuration error: {0}")]
    Compression(#[from] UnknownCompressionMode),
}

/// Keep-alive policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    pub enabled: bool,
    /// Idle time allowed between requests. `None` waits forever.
    pub idle_timeout: Option<Duration>,
    /// Requests per connection. `None` is unbounded.
    pub max_requests: Option<u64>,
}

/// Fully configured listener descriptor.
///
/// Built once per server start and not mutated after the server binds.
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub host: String,
    pub port: u16,
    pub auth_pass_through: bool,
    pub max_form_post_size: Option<u64>,
    pub max_buffered_post_size: Option<usize>,
    pub chunking_enabled: bool,
    pub transaction_timeout: Option<Duration>,
    pub max_http_header_size: Option<usize>,
    pub keep_alive: KeepAlive,
    pub secure: bool,
    pub tls: Option<TlsPolicy>,
    pub compression: CompressionPolicy,
    pub websocket: Option<WebSocketAddOn>,
}

impl ListenerSettings {
    /// A listener on `host:port` with transport defaults.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let mut settings = Self {
            host: host.into(),
            port,
            auth_pass_through: false,
            max_form_post_size: None,
            max_buffered_post_size: None,
            chunking_enabled: true,
            transaction_timeout: None,
            max_http_header_size: None,
            keep_alive: KeepAlive {
                enabled: true,
                idle_timeout: None,
                max_requests: None,
            },
            secure: false,
            tls: None,
            compression: CompressionPolicy::default(),
            websocket: None,
        };
        settings.apply_limits(&NetworkListenerConfig::default());
        settings
    }

    /// `host:port` in a form suitable for address resolution.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Attach the WebSocket add-on. An empty deployment attaches nothing.
    pub fn attach_websocket(&mut self, add_on: Option<WebSocketAddOn>) {
        self.websocket = add_on;
    }

    /// Header buffer size handed to the HTTP/1 transport.
    pub fn header_buffer_size(&self) -> Option<usize> {
        self.max_http_header_size.map(|size| size.max(MIN_HEADER_BUFFER))
    }

    fn apply_limits(&mut self, config: &NetworkListenerConfig) {
        self.auth_pass_through = config.auth_pass_through_enabled;
        self.max_form_post_size = non_negative(config.max_form_post_size);
        self.max_buffered_post_size = non_negative(config.max_buffered_post_size).map(|v| v as usize);
        self.chunking_enabled = config.chunking_enabled;
        self.transaction_timeout = positive_secs(config.transaction_timeout_secs);
        self.max_http_header_size = non_negative(config.max_http_header_size).map(|v| v as usize);

        self.keep_alive = KeepAlive {
            enabled: config.idle_timeout_secs != 0 && config.max_requests != 0,
            idle_timeout: positive_secs(config.idle_timeout_secs),
            max_requests: non_negative(config.max_requests),
        };
    }
}

fn non_negative(value: i64) -> Option<u64> {
    u64::try_from(value).ok()
}

fn positive_secs(value: i64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value as u64))
}

/// Build the listener descriptor for an HTTP server configuration.
pub fn build_listener(config: &HttpServerConfig) -> Result<ListenerSettings, ListenerConfigError> {
    let mut settings = ListenerSettings::new(config.host.clone(), config.port);
    if let Some(network) = &config.network_listener {
        configure_listener(&mut settings, network)?;
    }
    Ok(settings)
}

/// Apply network listener configuration onto a descriptor.
///
/// Order: scalar limits, keep-alive, TLS, compression.
pub fn configure_listener(
    settings: &mut ListenerSettings,
    config: &NetworkListenerConfig,
) -> Result<(), ListenerConfigError> {
    settings.apply_limits(config);

    if config.auth_pass_through_enabled {
        tracing::debug!("Auth pass-through enabled on listener");
    }

    if config.secure {
        let context = config
            .ssl_context
            .as_ref()
            .ok_or(ListenerConfigError::MissingSslContext)?;
        settings.tls = Some(TlsPolicy::configure(context, config.ssl_engine.as_ref()));
        settings.secure = true;
    }

    if let Some(compression) = &config.compression {
        settings.compression = CompressionPolicy::from_config(compression)?;
    }

    tracing::debug!(
        address = %settings.bind_address(),
        secure = settings.secure,
        compression = ?settings.compression.mode(),
        keep_alive = settings.keep_alive.enabled,
        "Listener configured"
    );

    Ok(())
}
