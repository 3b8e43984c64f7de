//! HTTP TRACE handling.
//!
//! Disabled: 405. Enabled and passed through: the application sees the
//! request. Enabled and not passed: the server echoes the request head.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::HttpServerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracePolicy {
    pub enabled: bool,
    pub pass_through: bool,
}

impl TracePolicy {
    pub fn from_config(config: &HttpServerConfig) -> Self {
        Self {
            enabled: config.trace_enabled,
            pass_through: config.pass_trace_request,
        }
    }
}

pub async fn trace_middleware(
    State(policy): State<TracePolicy>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.method() != Method::TRACE {
        return next.run(req).await;
    }
    if !policy.enabled {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    if policy.pass_through {
        return next.run(req).await;
    }

    let mut echo = format!("{} {} {:?}\r\n", req.method(), req.uri(), req.version());
    for (name, value) in req.headers() {
        echo.push_str(name.as_str());
        echo.push_str(": ");
        echo.push_str(&String::from_utf8_lossy(value.as_bytes()));
        echo.push_str("\r\n");
    }
    (
        [(header::CONTENT_TYPE, HeaderValue::from_static("message/http"))],
        echo,
    )
        .into_response()
}
