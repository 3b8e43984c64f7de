//! Configuration validation.
//!
//! Serde handles syntax; this module checks values that parse fine but
//! cannot be served. Every problem is reported, not just the first. The
//! secure-without-TLS-context case is left to the listener builder, which
//! owns that invariant.

use crate::config::schema::{HttpServerConfig, ServerConfig};

/// A single semantic problem with a configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a server configuration, collecting every error.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let http = &config.http_server;

    if http.host.trim().is_empty() {
        errors.push(ValidationError::new("http_server.host", "must not be empty"));
    }

    check_context("http_server.root_context", &http.root_context, &mut errors);

    if let Some(root) = &http.static_resource_context_root {
        check_context("http_server.static_resource_context_root", root, &mut errors);
    }

    if static_conflicts_with_root(http) {
        errors.push(ValidationError::new(
            "http_server.static_resource_context_root",
            "must differ from root_context",
        ));
    }

    if config.websocket.incoming_buffer_size == 0 {
        errors.push(ValidationError::new(
            "websocket.incoming_buffer_size",
            "must be greater than 0",
        ));
    }

    if config.logging.level.trim().is_empty() {
        errors.push(ValidationError::new("logging.level", "must not be empty"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_context(field: &'static str, value: &str, errors: &mut Vec<ValidationError>) {
    if !value.starts_with('/') {
        errors.push(ValidationError::new(field, format!("'{}' must start with '/'", value)));
    }
    if value.chars().any(char::is_whitespace) {
        errors.push(ValidationError::new(field, format!("'{}' must not contain whitespace", value)));
    }
}

fn static_conflicts_with_root(http: &HttpServerConfig) -> bool {
    match (&http.static_resource_directory, &http.static_resource_context_root) {
        (Some(_), Some(root)) => root.trim_end_matches('/') == http.root_context.trim_end_matches('/'),
        _ => false,
    }
}
