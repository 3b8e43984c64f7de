//! Shutdown coordination for the server.

use std::future::Future;
use std::time::Duration;

use axum_server::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::lifecycle::services::{ManagedServices, StopReport};
use crate::lifecycle::state::{LifecycleState, StateTracker};

/// Coordinator for shutdown requests.
///
/// Provides a broadcast channel that long-running tasks can subscribe to.
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// The shutdown sequence, armed before anything starts.
///
/// Runs on its own task. When the termination signal fires or `trigger` is
/// called it stops the listener immediately (no drain), then stops every
/// managed service.
pub struct ShutdownHook {
    shutdown: Shutdown,
    task: JoinHandle<StopReport>,
}

impl ShutdownHook {
    pub fn register<F>(
        signal: F,
        handle: Handle,
        services: ManagedServices,
        stop_timeout: Duration,
        state: StateTracker,
    ) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shutdown = Shutdown::new();
        let mut requested = shutdown.subscribe();

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = signal => tracing::info!("Termination signal received"),
                _ = requested.recv() => tracing::info!("Shutdown requested"),
            }
            state.advance(LifecycleState::ShuttingDown);

            tracing::info!("Stopping HTTP server...");
            handle.shutdown();

            tracing::info!("Stopping all managed services...");
            let report = services.stop_all(stop_timeout).await;
            tracing::info!(%report, "Shutdown hook finished");
            report
        });

        Self { shutdown, task }
    }

    /// Run the shutdown sequence now.
    pub fn trigger(&self) {
        self.shutdown.trigger();
    }

    /// Wait for the shutdown sequence to finish.
    pub async fn wait(self) -> StopReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "Shutdown hook failed");
                StopReport::default()
            }
        }
    }
}
