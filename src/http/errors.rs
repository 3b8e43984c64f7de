//! Error mapping and JSON responses for application handlers.
//!
//! Handlers return [`ApiError`]; the error rides along in the response
//! extensions until the `map_errors` layer hands it to the installed
//! [`ErrorMapper`], which renders the final response.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Error type for application handlers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{status}: {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(error: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = self.status.into_response();
        response.extensions_mut().insert(self);
        response
    }
}

/// Turns handler errors into responses.
pub trait ErrorMapper: Send + Sync + 'static {
    fn map_error(&self, error: &ApiError) -> Response;
}

/// Renders errors as `{ "code": <status>, "message": <text> }`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonErrorMapper;

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: u16,
    message: &'a str,
}

impl ErrorMapper for JsonErrorMapper {
    fn map_error(&self, error: &ApiError) -> Response {
        let body = ErrorBody {
            code: error.status.as_u16(),
            message: &error.message,
        };
        let mut response = PrettyJson(body).into_response();
        *response.status_mut() = error.status;
        response
    }
}

/// Middleware applying the installed error mapper.
pub async fn map_errors(
    State(mapper): State<Arc<dyn ErrorMapper>>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    match response.extensions().get::<ApiError>().cloned() {
        Some(error) => {
            if error.status.is_server_error() {
                tracing::error!(status = %error.status, message = %error.message, "Request failed");
            } else {
                tracing::debug!(status = %error.status, message = %error.message, "Request rejected");
            }
            mapper.map_error(&error)
        }
        None => response,
    }
}

/// JSON response with indented output.
#[derive(Debug, Clone)]
pub struct PrettyJson<T>(pub T);

impl<T: Serialize> IntoResponse for PrettyJson<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec_pretty(&self.0) {
            Ok(bytes) => (
                [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
                bytes,
            )
                .into_response(),
            Err(e) => ApiError::internal(e).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::routing::get;
    use axum::{middleware, Router};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct PlainMapper;

    impl ErrorMapper for PlainMapper {
        fn map_error(&self, error: &ApiError) -> Response {
            (StatusCode::IM_A_TEAPOT, error.message.clone()).into_response()
        }
    }

    fn app(mapper: Arc<dyn ErrorMapper>) -> Router {
        Router::new()
            .route("/ok", get(|| async { PrettyJson(json!({ "hello": "world" })) }))
            .route(
                "/missing",
                get(|| async { Err::<(), _>(ApiError::not_found("no such thing")) }),
            )
            .layer(middleware::from_fn_with_state(mapper, map_errors))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn default_mapper_renders_json() {
        let response = app(Arc::new(JsonErrorMapper))
            .oneshot(Request::get("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            json!({ "code": 404, "message": "no such thing" })
        );
    }

    #[tokio::test]
    async fn custom_mapper_replaces_default() {
        let response = app(Arc::new(PlainMapper))
            .oneshot(Request::get("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }

    #[tokio::test]
    async fn successful_responses_pass_through() {
        let response = app(Arc::new(JsonErrorMapper))
            .oneshot(Request::get("/ok").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(std::str::from_utf8(&bytes).unwrap().contains("\n  \"hello\""));
    }
}
