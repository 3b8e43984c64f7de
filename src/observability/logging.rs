//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber from `LoggingConfig`
//! - Let `RUST_LOG` override the configured level
//! - Log the startup banner
//!
//! # Design Decisions
//! - JSON format for production, pretty format for development
//! - Initialization is idempotent; a second call keeps the first subscriber

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    match result {
        Ok(()) => {
            tracing::debug!(level = %config.level, format = ?config.format, "Logging initialized");
            true
        }
        Err(_) => false,
    }
}

/// Log the startup banner for an application.
pub fn print_banner(app_name: &str, address: std::net::SocketAddr, secure: bool) {
    let scheme = if secure { "https" } else { "http" };
    tracing::info!("==================================================");
    tracing::info!("  {} started", app_name);
    tracing::info!("  listening on {}://{}", scheme, address);
    tracing::info!("==================================================");
}
