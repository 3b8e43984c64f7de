//! The application contract and its bootstrap registrar.
//!
//! # Responsibilities
//! - Define what an application supplies: its configuration type, a setup
//!   callback and optional hooks
//! - Collect everything registered during setup (routes, managed services,
//!   WebSocket endpoints, the error mapper) in one place
//! - Turn the collected registrations into an assembled server
//!
//! # Data Flow
//! ```text
//! Application::bootstrap(&config, &mut Bootstrap)
//!     → routes / services / endpoints / providers / error mapper
//!     → Bootstrap::assemble(&ServerConfig)
//!     → ServerAssembly { HttpServer, ManagedServices, stop timeout }
//! ```
//!
//! # Design Decisions
//! - `Bootstrap` is only mutable while `bootstrap` runs; `assemble` consumes it
//! - Endpoint providers are queried once, at assembly time

use std::sync::Arc;
use std::time::Duration;

use axum::routing::MethodRouter;
use serde_json::Value;

use crate::config::{AppConfiguration, ServerConfig};
use crate::http::errors::{ErrorMapper, JsonErrorMapper};
use crate::http::websocket::{Endpoint, EndpointDescriptor, EndpointProvider, EndpointRegistry};
use crate::http::{AppRoutes, HttpServer};
use crate::lifecycle::services::{BoxError, ManagedService, ServiceSetBuilder};
use crate::lifecycle::startup::{ServerAssembly, StartupError};
use crate::net::build_listener;

/// How long each managed service gets to stop during shutdown.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// A server application.
pub trait Application: Send + Sync + 'static {
    /// Configuration document for this application.
    type Config: AppConfiguration;

    /// Name used in the usage line, the default config file name and the
    /// startup banner. Defaults to the type's simple name.
    fn name(&self) -> &'static str {
        simple_type_name::<Self>()
    }

    /// Register routes, services and endpoints.
    fn bootstrap(&mut self, config: &Self::Config, bootstrap: &mut Bootstrap) -> Result<(), BoxError>;

    /// Adjust the assembled server before it starts.
    fn configure_server(&self, _server: &mut HttpServer) {}

    /// Handle the `db` command.
    fn db_command(&self, args: &[String]) -> Result<(), BoxError> {
        let _ = args;
        Err(format!("{} does not support the db command", self.name()).into())
    }
}

/// Everything an application registers during setup.
pub struct Bootstrap {
    routes: AppRoutes,
    services: ServiceSetBuilder,
    endpoints: EndpointRegistry,
    providers: Vec<Box<dyn EndpointProvider>>,
    error_mapper: Arc<dyn ErrorMapper>,
    stop_timeout: Duration,
}

impl Bootstrap {
    pub fn new() -> Self {
        Self {
            routes: AppRoutes::new(),
            services: ServiceSetBuilder::new(),
            endpoints: EndpointRegistry::new(),
            providers: Vec::new(),
            error_mapper: Arc::new(JsonErrorMapper),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Add an application route. Routes are served under the root context.
    pub fn route(&mut self, path: &str, method_router: MethodRouter) -> &mut Self {
        let current = std::mem::take(&mut self.routes);
        self.routes = current.route(path, method_router);
        self
    }

    /// Add a managed service. Registering the same instance twice has no effect.
    pub fn register_service<S: ManagedService>(&mut self, service: Arc<S>) -> &mut Self {
        if !self.services.add(service) {
            tracing::debug!("Managed service already registered");
        }
        self
    }

    pub fn register_endpoint(&mut self, descriptor: EndpointDescriptor) -> &mut Self {
        self.endpoints.register(descriptor);
        self
    }

    /// Register `endpoint` at `path` with the given user properties.
    pub fn register_endpoint_with<E, I, K>(&mut self, endpoint: E, path: &str, properties: I) -> &mut Self
    where
        E: Endpoint,
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.register_endpoint(EndpointDescriptor::new(endpoint, path).with_properties(properties))
    }

    /// Add a source of discovered endpoints.
    pub fn discover_endpoints(&mut self, provider: impl EndpointProvider + 'static) -> &mut Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Replace the default JSON error mapper.
    pub fn set_error_mapper(&mut self, mapper: impl ErrorMapper) -> &mut Self {
        self.error_mapper = Arc::new(mapper);
        self
    }

    pub fn set_stop_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Build the listener, deploy endpoints and assemble the server.
    pub fn assemble(self, config: &ServerConfig) -> Result<ServerAssembly, StartupError> {
        let mut settings = build_listener(&config.http_server)?;

        let mut registry = self.endpoints;
        for provider in &self.providers {
            registry.discover_from(provider.as_ref());
        }
        let add_on = registry.merge(
            &config.http_server.root_context,
            config.websocket.incoming_buffer_size,
        )?;
        settings.attach_websocket(add_on);

        let server = HttpServer::new(&config.http_server, settings, self.routes, self.error_mapper)?;
        Ok(ServerAssembly {
            server,
            services: self.services.finish(),
            stop_timeout: self.stop_timeout,
        })
    }
}

impl Default for Bootstrap {
    fn default() -> Self {
        Self::new()
    }
}

/// Last path segment of a type name, without generic arguments.
pub fn simple_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
