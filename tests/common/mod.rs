//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::time::Duration;

use servekit::lifecycle::{LifecycleController, LifecycleState, ServeOutcome};
use servekit::{AppConfiguration, Application};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A server running on an ephemeral loopback port.
#[allow(dead_code)]
pub struct TestServer {
    pub addr: SocketAddr,
    pub controller: LifecycleController,
    shutdown: Option<oneshot::Sender<()>>,
    run: JoinHandle<ServeOutcome>,
}

#[allow(dead_code)]
impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Deliver the termination signal and wait for the run to end.
    pub async fn stop(mut self) -> ServeOutcome {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(10), self.run)
            .await
            .expect("server did not stop in time")
            .expect("serve task panicked")
    }
}

/// Bootstrap, assemble and start `app` on 127.0.0.1 with an ephemeral port.
pub async fn start_app<A: Application>(mut app: A, mut config: A::Config) -> TestServer
where
    A::Config: LoopbackConfig,
{
    config.loopback();

    let controller = LifecycleController::new();
    let bootstrap = controller.bootstrap(&mut app, &config).unwrap();
    let mut assembly = controller.assemble(bootstrap, config.server()).unwrap();
    app.configure_server(&mut assembly.server);

    let (tx, rx) = oneshot::channel::<()>();
    let mut states = controller.subscribe();
    let run = tokio::spawn({
        let controller = controller.clone();
        let name = app.name();
        async move {
            controller
                .serve(assembly, name, async move {
                    let _ = rx.await;
                })
                .await
        }
    });

    tokio::time::timeout(
        Duration::from_secs(10),
        states.wait_for(|state| *state >= LifecycleState::Listening),
    )
    .await
    .expect("server did not start listening")
    .unwrap();

    TestServer {
        addr: controller.local_addr().expect("listening without an address"),
        controller,
        shutdown: Some(tx),
        run,
    }
}

/// Point a configuration at an ephemeral loopback port.
pub trait LoopbackConfig: AppConfiguration {
    fn loopback(&mut self);
}

impl LoopbackConfig for servekit::ServerConfig {
    fn loopback(&mut self) {
        self.http_server.host = "127.0.0.1".into();
        self.http_server.port = 0;
    }
}
