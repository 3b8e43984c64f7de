//! Response compression policy.
//!
//! # Responsibilities
//! - Translate `CompressionConfig` into a `CompressionPolicy`
//! - Decide per response whether compression applies (mode, size, MIME type)
//! - Exempt configured user agents by hiding `Accept-Encoding` from the encoder
//!
//! # Design Decisions
//! - Configured sets replace the encoder defaults; an empty set matches nothing
//! - `force` bypasses the MIME and user-agent filters but not the size floor

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, Response};
use axum::middleware::Next;
use tower_http::compression::predicate::Predicate;

use crate::config::CompressionConfig;

/// Compression mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMode {
    #[default]
    Off,
    On,
    Force,
}

/// Returned when a mode string is not one of `off`, `on`, `force`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized compression mode '{0}' (expected off, on or force)")]
pub struct UnknownCompressionMode(pub String);

impl FromStr for CompressionMode {
    type Err = UnknownCompressionMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "on" => Ok(Self::On),
            "force" => Ok(Self::Force),
            _ => Err(UnknownCompressionMode(s.to_string())),
        }
    }
}

/// Resolved compression policy for a listener.
#[derive(Debug, Clone, Default)]
pub struct CompressionPolicy {
    mode: CompressionMode,
    min_size_bytes: u64,
    mime_types: Arc<HashSet<String>>,
    excluded_user_agents: Arc<HashSet<String>>,
}

impl CompressionPolicy {
    /// Build a policy from configuration. Fails on an unknown mode.
    pub fn from_config(config: &CompressionConfig) -> Result<Self, UnknownCompressionMode> {
        let mode = config.mode.parse()?;
        Ok(Self {
            mode,
            min_size_bytes: config.min_size_bytes,
            mime_types: Arc::new(
                config
                    .compressable_mime_types
                    .iter()
                    .map(|m| m.trim().to_ascii_lowercase())
                    .collect(),
            ),
            excluded_user_agents: Arc::new(config.no_compression_user_agents.iter().cloned().collect()),
        })
    }

    pub fn mode(&self) -> CompressionMode {
        self.mode
    }

    pub fn min_size_bytes(&self) -> u64 {
        self.min_size_bytes
    }

    pub fn mime_types(&self) -> &HashSet<String> {
        &self.mime_types
    }

    pub fn excluded_user_agents(&self) -> &HashSet<String> {
        &self.excluded_user_agents
    }

    pub fn is_enabled(&self) -> bool {
        self.mode != CompressionMode::Off
    }

    /// Whether requests from this user agent must not be compressed.
    pub fn excludes_user_agent(&self, user_agent: &str) -> bool {
        self.mode != CompressionMode::Force && self.excluded_user_agents.contains(user_agent)
    }

    /// Whether a response with this content type and length may be compressed.
    pub fn allows(&self, content_type: Option<&str>, content_length: Option<u64>) -> bool {
        if self.mode == CompressionMode::Off {
            return false;
        }
        if content_length.is_some_and(|len| len < self.min_size_bytes) {
            return false;
        }
        if self.mode == CompressionMode::Force {
            return true;
        }
        let Some(content_type) = content_type else {
            return false;
        };
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.mime_types.contains(&essence)
    }
}

impl Predicate for CompressionPolicy {
    fn should_compress<B>(&self, response: &Response<B>) -> bool
    where
        B: http_body::Body,
    {
        let headers = response.headers();
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let content_length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .or_else(|| response.body().size_hint().exact());
        self.allows(content_type, content_length)
    }
}

/// Strip `Accept-Encoding` from requests sent by exempted user agents.
pub async fn exempt_user_agents(
    State(policy): State<CompressionPolicy>,
    mut request: Request,
    next: Next,
) -> Response<Body> {
    let excluded = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ua| policy.excludes_user_agent(ua));

    if excluded {
        tracing::trace!("Compression disabled for user agent");
        request.headers_mut().remove(header::ACCEPT_ENCODING);
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn config(mode: &str) -> CompressionConfig {
        CompressionConfig {
            mode: mode.to_string(),
            min_size_bytes: 100,
            compressable_mime_types: BTreeSet::from(["text/html".to_string(), "application/json".to_string()]),
            no_compression_user_agents: BTreeSet::from(["legacy-agent".to_string()]),
        }
    }

    #[test]
    fn mode_lookup_is_case_insensitive() {
        assert_eq!("OFF".parse::<CompressionMode>(), Ok(CompressionMode::Off));
        assert_eq!("On".parse::<CompressionMode>(), Ok(CompressionMode::On));
        assert_eq!("force".parse::<CompressionMode>(), Ok(CompressionMode::Force));
        assert!("gzip".parse::<CompressionMode>().is_err());
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = CompressionPolicy::from_config(&config("sometimes")).unwrap_err();
        assert_eq!(err, UnknownCompressionMode("sometimes".into()));
    }

    #[test]
    fn on_mode_filters_by_mime_and_size() {
        let policy = CompressionPolicy::from_config(&config("on")).unwrap();
        assert!(policy.allows(Some("application/json; charset=utf-8"), Some(500)));
        assert!(policy.allows(Some("TEXT/HTML"), None));
        assert!(!policy.allows(Some("image/png"), Some(500)));
        assert!(!policy.allows(Some("text/html"), Some(99)));
        assert!(!policy.allows(None, Some(500)));
    }

    #[test]
    fn force_mode_ignores_mime_but_not_size() {
        let policy = CompressionPolicy::from_config(&config("force")).unwrap();
        assert!(policy.allows(Some("image/png"), Some(500)));
        assert!(!policy.allows(Some("image/png"), Some(10)));
        assert!(!policy.excludes_user_agent("legacy-agent"));
    }

    #[test]
    fn off_mode_never_compresses() {
        let policy = CompressionPolicy::from_config(&config("off")).unwrap();
        assert!(!policy.is_enabled());
        assert!(!policy.allows(Some("text/html"), Some(10_000)));
    }

    #[test]
    fn empty_sets_compress_nothing_and_exempt_nothing() {
        let mut cfg = config("on");
        cfg.compressable_mime_types.clear();
        cfg.no_compression_user_agents.clear();
        let policy = CompressionPolicy::from_config(&cfg).unwrap();
        assert!(!policy.allows(Some("text/html"), Some(500)));
        assert!(!policy.excludes_user_agent("legacy-agent"));
    }

    #[test]
    fn predicate_reads_response_headers() {
        let policy = CompressionPolicy::from_config(&config("on")).unwrap();
        let response = Response::builder()
            .header(header::CONTENT_TYPE, "text/html")
            .body(Body::from("x".repeat(200)))
            .unwrap();
        assert!(policy.should_compress(&response));

        let small = Response::builder()
            .header(header::CONTENT_TYPE, "text/html")
            .body(Body::from("tiny"))
            .unwrap();
        assert!(!policy.should_compress(&small));
    }
}
