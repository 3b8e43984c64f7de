//! Demo server built on servekit.
//!
//! ```text
//! servekit server [servekit.yml]
//! ```
//!
//! Serves `GET /health`, an echo WebSocket at `/echo` and runs a heartbeat
//! service that logs every few seconds until shutdown.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use axum::routing::get;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use servekit::http::PrettyJson;
use servekit::{Application, Bootstrap, BoxError, Endpoint, ManagedService, ServerConfig, ServerEndpoint, Session};

#[derive(Default)]
struct Echo;

#[async_trait]
impl Endpoint for Echo {
    async fn serve(&self, mut socket: WebSocket, session: Session) {
        while let Some(Ok(message)) = socket.recv().await {
            match message {
                Message::Text(_) | Message::Binary(_) => {
                    if socket.send(message).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        tracing::debug!(path = %session.path, "Echo session closed");
    }
}

impl ServerEndpoint for Echo {
    const PATH: &'static str = "/echo";
}

#[derive(Default)]
struct Heartbeat {
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl ManagedService for Heartbeat {
    fn name(&self) -> &str {
        "heartbeat"
    }

    async fn start(&self) -> Result<(), BoxError> {
        let task = tokio::spawn(async {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                tracing::debug!("heartbeat");
            }
        });
        *self.task.lock().await = Some(task);
        Ok(())
    }

    async fn stop(&self) -> Result<(), BoxError> {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
        Ok(())
    }
}

struct Servekit;

impl Application for Servekit {
    type Config = ServerConfig;

    fn bootstrap(&mut self, _config: &ServerConfig, bootstrap: &mut Bootstrap) -> Result<(), BoxError> {
        bootstrap
            .route("/health", get(|| async { PrettyJson(json!({ "status": "ok" })) }))
            .discover_endpoints(servekit::http::DeclaredEndpoints::new().with::<Echo>())
            .register_service(Arc::new(Heartbeat::default()));
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    servekit::launch(Servekit, std::env::args()).await
}
