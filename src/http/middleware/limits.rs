//! Request limit middleware.
//! Enforces the listener's form size and chunking settings. Forms sent
//! without a `Content-Length` are buffered and capped while being read.

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::net::ListenerSettings;

/// Limits checked before a request reaches the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    pub max_form_post_size: Option<u64>,
    pub chunking_enabled: bool,
}

impl RequestLimits {
    pub fn from_settings(settings: &ListenerSettings) -> Self {
        Self {
            max_form_post_size: settings.max_form_post_size,
            chunking_enabled: settings.chunking_enabled,
        }
    }
}

pub async fn request_limits_middleware(
    State(limits): State<RequestLimits>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let headers = req.headers();

    if !limits.chunking_enabled && is_chunked(headers) {
        return (StatusCode::LENGTH_REQUIRED, "Chunked request bodies are not accepted").into_response();
    }

    let Some(max) = limits.max_form_post_size.filter(|_| is_form(headers)) else {
        return next.run(req).await;
    };

    match content_length(headers) {
        Some(len) if len > max => form_too_large(max),
        Some(_) => next.run(req).await,
        None => {
            // No declared length: buffer the form up to the limit.
            let (parts, body) = req.into_parts();
            let limit = usize::try_from(max).unwrap_or(usize::MAX);
            match to_bytes(body, limit).await {
                Ok(bytes) => next.run(Request::from_parts(parts, Body::from(bytes))).await,
                Err(e) => {
                    tracing::debug!(error = %e, "Reading form body failed");
                    form_too_large(max)
                }
            }
        }
    }
}

fn form_too_large(max: u64) -> Response {
    tracing::debug!(max, "Form body exceeds limit");
    (StatusCode::PAYLOAD_TOO_LARGE, "Form body too large").into_response()
}

fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("chunked"))
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().starts_with("application/x-www-form-urlencoded"))
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::post, Router};
    use tower::ServiceExt;

    fn app(limits: RequestLimits) -> Router {
        Router::new()
            .route("/", post(|| async { "ok" }))
            .route("/echo", post(|body: String| async move { body }))
            .layer(middleware::from_fn_with_state(limits, request_limits_middleware))
    }

    fn form(len: usize) -> Request<Body> {
        Request::post("/")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::CONTENT_LENGTH, len.to_string())
            .body(Body::from("a".repeat(len)))
            .unwrap()
    }

    #[tokio::test]
    async fn oversized_forms_are_rejected() {
        let limits = RequestLimits {
            max_form_post_size: Some(10),
            chunking_enabled: true,
        };
        let small = app(limits).oneshot(form(10)).await.unwrap();
        assert_eq!(small.status(), StatusCode::OK);

        let large = app(limits).oneshot(form(11)).await.unwrap();
        assert_eq!(large.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn forms_without_length_are_capped_while_reading() {
        let limits = RequestLimits {
            max_form_post_size: Some(10),
            chunking_enabled: true,
        };
        let streamed = |len: usize| {
            let chunks = vec![Ok::<_, std::io::Error>("a".repeat(len))];
            Request::post("/echo")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header(header::TRANSFER_ENCODING, "chunked")
                .body(Body::from_stream(futures_util::stream::iter(chunks)))
                .unwrap()
        };

        let small = app(limits).oneshot(streamed(10)).await.unwrap();
        assert_eq!(small.status(), StatusCode::OK);
        let bytes = to_bytes(small.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.len(), 10);

        let large = app(limits).oneshot(streamed(11)).await.unwrap();
        assert_eq!(large.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn chunked_bodies_rejected_when_disabled() {
        let request = || {
            Request::post("/")
                .header(header::TRANSFER_ENCODING, "chunked")
                .body(Body::empty())
                .unwrap()
        };
        let disabled = RequestLimits {
            max_form_post_size: None,
            chunking_enabled: false,
        };
        let response = app(disabled).oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::LENGTH_REQUIRED);

        let enabled = RequestLimits {
            chunking_enabled: true,
            ..disabled
        };
        let response = app(enabled).oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
