//! Startup orchestration.
//!
//! # Responsibilities
//! - Load configuration and run the application's setup callback
//! - Assemble the listener, WebSocket deployment and router
//! - Arm the shutdown hook before anything starts
//! - Start managed services, then bind the listener and block until it stops
//!
//! # Data Flow
//! ```text
//! launch(app, args)
//!     → parse_invocation ── db ──→ Application::db_command
//!     → load_config → init_logging
//!     → LifecycleController::bootstrap   (Created → Bootstrapped)
//!     → LifecycleController::assemble    (→ ListenerAssembled)
//!     → LifecycleController::serve       (→ ServicesStarting → Listening
//!                                          → ShuttingDown → Stopped)
//! ```
//!
//! # Design Decisions
//! - Fail fast: configuration and deployment errors end the run before
//!   any service starts
//! - A failure while binding or serving is logged, never propagated; the
//!   shutdown hook still runs so started services are stopped
//! - Only the process exit code reports failure to the caller

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum_server::Handle;
use tokio::sync::watch;
use tokio::task::JoinError;

use crate::application::{Application, Bootstrap};
use crate::cli::{parse_invocation, Invocation};
use crate::config::{load_config, AppConfiguration, ConfigError, ServerConfig};
use crate::http::websocket::DeploymentError;
use crate::http::{HttpServer, ServeError};
use crate::lifecycle::services::{BoxError, ManagedServices, StopReport};
use crate::lifecycle::shutdown::ShutdownHook;
use crate::lifecycle::signals;
use crate::lifecycle::state::{LifecycleState, StateTracker};
use crate::net::ListenerConfigError;
use crate::observability::logging::{init_logging, print_banner};

/// Error type for everything that can fail before the server binds.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Listener(#[from] ListenerConfigError),
    #[error(transparent)]
    Deployment(#[from] DeploymentError),
    #[error("application bootstrap failed: {0}")]
    Bootstrap(BoxError),
}

/// An assembled server, ready to start.
pub struct ServerAssembly {
    pub server: HttpServer,
    pub services: ManagedServices,
    /// Per-service stop deadline used by the shutdown hook.
    pub stop_timeout: Duration,
}

/// How a run ended.
#[derive(Debug)]
pub struct ServeOutcome {
    /// Error that ended serving early, if any.
    pub error: Option<ServeError>,
    pub stop_report: StopReport,
}

impl ServeOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Drives one server run through its lifecycle states.
#[derive(Clone, Default)]
pub struct LifecycleController {
    state: StateTracker,
    local_addr: Arc<OnceLock<SocketAddr>>,
}

impl LifecycleController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Address the listener is bound to, once it is listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Run the application's setup callback.
    pub fn bootstrap<A: Application>(
        &self,
        app: &mut A,
        config: &A::Config,
    ) -> Result<Bootstrap, StartupError> {
        let mut bootstrap = Bootstrap::new();
        app.bootstrap(config, &mut bootstrap)
            .map_err(StartupError::Bootstrap)?;
        self.state.advance(LifecycleState::Bootstrapped);
        Ok(bootstrap)
    }

    /// Build the listener and assemble the server from the registrations.
    pub fn assemble(
        &self,
        bootstrap: Bootstrap,
        config: &ServerConfig,
    ) -> Result<ServerAssembly, StartupError> {
        let assembly = bootstrap.assemble(config)?;
        self.state.advance(LifecycleState::ListenerAssembled);
        Ok(assembly)
    }

    /// Start services, bind the listener and block until the server stops.
    ///
    /// The shutdown hook is armed first, so `shutdown_signal` (or a failure
    /// while serving) always stops the listener and every managed service.
    pub async fn serve<F>(
        &self,
        assembly: ServerAssembly,
        app_name: &str,
        shutdown_signal: F,
    ) -> ServeOutcome
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let ServerAssembly {
            server,
            services,
            stop_timeout,
        } = assembly;
        let handle = Handle::new();
        let secure = server.settings().secure;

        let hook = ShutdownHook::register(
            shutdown_signal,
            handle.clone(),
            services.clone(),
            stop_timeout,
            self.state.clone(),
        );

        self.state.advance(LifecycleState::ServicesStarting);
        services.start_all();

        tracing::info!(address = %server.settings().bind_address(), "Starting the HTTP server");
        let mut serving = tokio::spawn(server.run(handle.clone()));

        let bound = tokio::select! {
            result = &mut serving => Err(flatten(result)),
            addr = handle.listening() => Ok(addr),
        };

        let result = match bound {
            Ok(Some(addr)) => {
                let _ = self.local_addr.set(addr);
                self.state.advance(LifecycleState::Listening);
                print_banner(app_name, addr, secure);
                tracing::info!("Press CTRL^C to exit..");
                flatten(serving.await)
            }
            Ok(None) => flatten(serving.await),
            Err(result) => result,
        };

        let error = match result {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(error = %e, "There was an error while starting the HTTP server");
                Some(e)
            }
        };

        hook.trigger();
        let stop_report = hook.wait().await;
        self.state.advance(LifecycleState::Stopped);
        tracing::info!(%stop_report, "Server stopped");

        ServeOutcome { error, stop_report }
    }
}

fn flatten(result: Result<Result<(), ServeError>, JoinError>) -> Result<(), ServeError> {
    match result {
        Ok(inner) => inner,
        Err(e) => Err(ServeError::Io(std::io::Error::other(e))),
    }
}

/// Parse the command line and run the application.
///
/// Exit status is 0 after a normal shutdown, 1 for a usage error, a
/// configuration or startup failure, or a failed `db` command.
pub async fn launch<A, I>(app: A, args: I) -> ExitCode
where
    A: Application,
    I: IntoIterator<Item = String>,
{
    let invocation = match parse_invocation(app.name(), args) {
        Ok(invocation) => invocation,
        Err(usage) => {
            eprintln!("{usage}");
            return ExitCode::FAILURE;
        }
    };

    match invocation {
        Invocation::Server { config_file } => run_server(app, &config_file, signals::termination()).await,
        Invocation::Db { args } => match app.db_command(&args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("db command failed: {e}");
                ExitCode::FAILURE
            }
        },
    }
}

/// Load `config_file` and run the server until `shutdown_signal` fires.
pub async fn run_server<A, F>(mut app: A, config_file: &Path, shutdown_signal: F) -> ExitCode
where
    A: Application,
    F: Future<Output = ()> + Send + 'static,
{
    let config: A::Config = match load_config(config_file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {e}", config_file.display());
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.server().logging);
    tracing::info!(app = app.name(), config = %config_file.display(), "Configuration loaded");

    let controller = LifecycleController::new();
    let assembly = controller
        .bootstrap(&mut app, &config)
        .and_then(|bootstrap| controller.assemble(bootstrap, config.server()));
    let mut assembly = match assembly {
        Ok(assembly) => assembly,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };
    app.configure_server(&mut assembly.server);

    let outcome = controller.serve(assembly, app.name(), shutdown_signal).await;
    if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
