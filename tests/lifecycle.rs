//! End-to-end tests: bootstrap an application, serve it on a real socket,
//! talk HTTP and WebSocket to it, then shut it down.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use servekit::config::loader::parse_config;
use servekit::http::{ErrorMapper, PrettyJson};
use servekit::lifecycle::{run_server, StopOutcome};
use servekit::{
    ApiError, AppConfiguration, Application, Bootstrap, BoxError, Endpoint, EndpointDescriptor,
    ManagedService, ServerConfig, Session,
};
use tokio_tungstenite::tungstenite;

mod common;

use common::{start_app, LoopbackConfig};

#[derive(Debug, Default, Deserialize)]
struct InventoryConfig {
    #[serde(flatten)]
    server: ServerConfig,
    #[serde(default)]
    warehouse: String,
}

impl AppConfiguration for InventoryConfig {
    fn server(&self) -> &ServerConfig {
        &self.server
    }
}

impl LoopbackConfig for InventoryConfig {
    fn loopback(&mut self) {
        self.server.loopback();
    }
}

/// Sends the session's properties, then echoes text frames.
struct Echo;

#[async_trait]
impl Endpoint for Echo {
    async fn serve(&self, mut socket: WebSocket, session: Session) {
        let greeting = json!({ "path": session.path, "properties": session.user_properties.as_ref() });
        if socket.send(Message::Text(greeting.to_string().into())).await.is_err() {
            return;
        }
        while let Some(Ok(message)) = socket.recv().await {
            if let Message::Text(_) = message {
                if socket.send(message).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[derive(Default)]
struct StockCache {
    starts: AtomicUsize,
    stops: AtomicUsize,
}

#[async_trait]
impl ManagedService for StockCache {
    fn name(&self) -> &str {
        "stock-cache"
    }

    async fn start(&self) -> Result<(), BoxError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), BoxError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct TextMapper;

impl ErrorMapper for TextMapper {
    fn map_error(&self, error: &ApiError) -> Response {
        (error.status, format!("inventory error: {}", error.message)).into_response()
    }
}

struct Inventory {
    cache: Arc<StockCache>,
}

impl Inventory {
    fn new() -> Self {
        Self {
            cache: Arc::new(StockCache::default()),
        }
    }
}

impl Application for Inventory {
    type Config = InventoryConfig;

    fn bootstrap(&mut self, config: &InventoryConfig, bootstrap: &mut Bootstrap) -> Result<(), BoxError> {
        let warehouse = config.warehouse.clone();
        bootstrap
            .route(
                "/stock",
                get(move || {
                    let warehouse = warehouse.clone();
                    async move { PrettyJson(json!({ "warehouse": warehouse, "items": 3 })) }
                }),
            )
            .route(
                "/stock/missing",
                get(|| async { Err::<(), _>(ApiError::not_found("no such item")) }),
            )
            .register_endpoint(EndpointDescriptor::new(Echo, "/echo").with_property("room", "lobby"))
            .register_service(self.cache.clone())
            .set_error_mapper(TextMapper);
        Ok(())
    }
}

const CONFIG: &str = r#"
warehouse: north
http_server:
  root_context: /api
  metrics_enabled: true
websocket:
  incoming_buffer_size: 64
"#;

fn config() -> InventoryConfig {
    parse_config(CONFIG, Path::new("inventory.yml")).unwrap()
}

#[tokio::test]
async fn serves_routes_under_root_context() {
    let server = start_app(Inventory::new(), config()).await;
    let client = reqwest::Client::new();

    let response = client.get(server.url("/api/stock")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "warehouse": "north", "items": 3 }));

    let outside = client.get(server.url("/stock")).send().await.unwrap();
    assert_eq!(outside.status(), StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn application_errors_use_the_registered_mapper() {
    let server = start_app(Inventory::new(), config()).await;

    let response = reqwest::get(server.url("/api/stock/missing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.text().await.unwrap(), "inventory error: no such item");

    server.stop().await;
}

#[tokio::test]
async fn trace_is_rejected_by_default() {
    let server = start_app(Inventory::new(), config()).await;

    let response = reqwest::Client::new()
        .request(reqwest::Method::TRACE, server.url("/api/stock"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    server.stop().await;
}

#[tokio::test]
async fn metrics_are_exposed_under_root_context() {
    let server = start_app(Inventory::new(), config()).await;

    reqwest::get(server.url("/api/stock")).await.unwrap();
    let response = reqwest::get(server.url("/api/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    server.stop().await;
}

#[tokio::test]
async fn websocket_sessions_receive_properties_and_echo() {
    let server = start_app(Inventory::new(), config()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(server.ws_url("/api/echo"))
        .await
        .unwrap();

    let greeting = socket.next().await.unwrap().unwrap();
    let greeting: Value = serde_json::from_str(greeting.to_text().unwrap()).unwrap();
    assert_eq!(greeting["path"], "/api/echo");
    assert_eq!(greeting["properties"]["room"], "lobby");

    socket
        .send(tungstenite::Message::text("restock"))
        .await
        .unwrap();
    let echoed = socket.next().await.unwrap().unwrap();
    assert_eq!(echoed.to_text().unwrap(), "restock");

    server.stop().await;
}

#[tokio::test]
async fn oversized_websocket_messages_end_the_session() {
    let server = start_app(Inventory::new(), config()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(server.ws_url("/api/echo"))
        .await
        .unwrap();
    socket.next().await.unwrap().unwrap();

    socket
        .send(tungstenite::Message::text("x".repeat(1024)))
        .await
        .unwrap();
    let next = socket.next().await;
    assert!(
        matches!(next, None | Some(Err(_)) | Some(Ok(tungstenite::Message::Close(_)))),
        "oversized message was echoed: {next:?}"
    );

    server.stop().await;
}

#[tokio::test]
async fn shutdown_stops_listener_and_services() {
    let app = Inventory::new();
    let cache = app.cache.clone();
    let server = start_app(app, config()).await;
    let addr = server.addr;

    for _ in 0..100 {
        if cache.starts.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(cache.starts.load(Ordering::SeqCst), 1);

    let outcome = server.stop().await;
    assert!(outcome.is_success());
    assert_eq!(outcome.stop_report.outcome("stock-cache"), Some(&StopOutcome::Stopped));
    assert_eq!(cache.stops.load(Ordering::SeqCst), 1);

    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn missing_config_file_fails() {
    let code = run_server(
        Inventory::new(),
        Path::new("/nonexistent/inventory.yml"),
        std::future::ready(()),
    )
    .await;
    assert_eq!(code, ExitCode::FAILURE);
}

#[tokio::test]
async fn invalid_config_fails_before_services_start() {
    let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
    writeln!(file, "http_server:\n  root_context: api").unwrap();

    let app = Inventory::new();
    let cache = app.cache.clone();
    let code = run_server(app, file.path(), std::future::ready(())).await;

    assert_eq!(code, ExitCode::FAILURE);
    assert_eq!(cache.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn bind_failure_exits_with_failure() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[http_server]\nhost = \"127.0.0.1\"\nport = {port}").unwrap();

    let app = Inventory::new();
    let cache = app.cache.clone();
    let code = run_server(app, file.path(), std::future::pending()).await;

    assert_eq!(code, ExitCode::FAILURE);
    assert_eq!(cache.stops.load(Ordering::SeqCst), 1);
}
