//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Nest the application router under the root context
//! - Attach the WebSocket add-on, static files and the metrics endpoint
//! - Wire up middleware (trace, limits, timeout, compression, keep-alive)
//! - Bind the listener (plain or TLS) and serve until the handle stops it

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, MethodRouter};
use axum::{middleware, Router};
use axum_server::Handle;
use hyper_util::rt::TokioTimer;
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::HttpServerConfig;
use crate::http::errors::{map_errors, ErrorMapper};
use crate::http::middleware::{request_limits_middleware, trace_middleware, RequestLimits, TracePolicy};
use crate::http::websocket::{join_route, DeploymentError};
use crate::net::compression::exempt_user_agents;
use crate::net::connection::{enforce_request_budget, ConnectionInfo, RequestBudget};
use crate::net::{ListenerSettings, TlsError};
use crate::observability::metrics;

/// Error type for binding and serving.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to resolve listener address {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("listener address {0} did not resolve to any socket address")]
    NoAddress(String),
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application routes together with the paths they occupy.
#[derive(Default)]
pub struct AppRoutes {
    router: Router,
    paths: BTreeSet<String>,
}

impl AppRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, path: &str, method_router: MethodRouter) -> Self {
        self.router = self.router.route(path, method_router);
        self.paths.insert(path.to_string());
        self
    }

    /// Whether `route` (including the root context) is an application route.
    pub fn occupies(&self, root_context: &str, route: &str) -> bool {
        self.paths.iter().any(|path| join_route(root_context, path) == route)
    }
}

/// The assembled HTTP server: listener settings plus the complete router.
pub struct HttpServer {
    settings: ListenerSettings,
    router: Router,
}

impl HttpServer {
    /// Assemble the server for a listener and the application routes.
    ///
    /// Fails when a WebSocket endpoint or the metrics route would shadow an
    /// application route.
    pub fn new(
        config: &HttpServerConfig,
        settings: ListenerSettings,
        routes: AppRoutes,
        error_mapper: Arc<dyn ErrorMapper>,
    ) -> Result<Self, DeploymentError> {
        check_overlaps(config, &settings, &routes)?;
        let router = Self::build_router(config, &settings, routes.router, error_mapper);
        Ok(Self { settings, router })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(
        config: &HttpServerConfig,
        settings: &ListenerSettings,
        routes: Router,
        error_mapper: Arc<dyn ErrorMapper>,
    ) -> Router {
        let routes = routes.layer(middleware::from_fn_with_state(error_mapper, map_errors));
        let root = config.root_context.trim_end_matches('/');

        let mut router = if root.is_empty() {
            Router::new().merge(routes)
        } else {
            Router::new().nest(root, routes)
        };

        if let Some(add_on) = &settings.websocket {
            router = router.merge(add_on.router());
        }

        let metrics_handle = config
            .metrics_enabled
            .then(metrics::install_recorder)
            .flatten();
        if let Some(handle) = metrics_handle.clone() {
            if let Some(path) = metrics_route(config) {
                router = router.route(&path, get(metrics::render).with_state(handle));
            }
        }

        match (&config.static_resource_directory, &config.static_resource_context_root) {
            (Some(dir), Some(context)) => {
                tracing::info!(directory = %dir, context = %context, "Serving static resources");
                let files = ServeDir::new(dir);
                let context = context.trim_end_matches('/');
                router = if context.is_empty() {
                    router.fallback_service(files)
                } else {
                    router.nest_service(context, files)
                };
            }
            (None, None) => {}
            _ => tracing::warn!(
                "static_resource_directory and static_resource_context_root must both be set; static resources disabled"
            ),
        }

        if let Some(limit) = settings.max_buffered_post_size {
            router = router.layer(DefaultBodyLimit::max(limit));
        } else {
            router = router.layer(DefaultBodyLimit::disable());
        }

        if let Some(timeout) = settings.transaction_timeout {
            router = router.layer(TimeoutLayer::new(timeout));
        }

        if settings.compression.is_enabled() {
            let policy = settings.compression.clone();
            router = router
                .layer(CompressionLayer::new().compress_when(policy.clone()))
                .layer(middleware::from_fn_with_state(policy, exempt_user_agents));
        }

        router = router.layer(middleware::from_fn_with_state(
            RequestLimits::from_settings(settings),
            request_limits_middleware,
        ));

        if let Some(max_requests) = settings.keep_alive.max_requests {
            router = router.layer(middleware::from_fn_with_state(
                RequestBudget { max_requests },
                enforce_request_budget,
            ));
        }

        router = router.layer(middleware::from_fn_with_state(
            TracePolicy::from_config(config),
            trace_middleware,
        ));

        if metrics_handle.is_some() {
            router = router.layer(middleware::from_fn(metrics::track_requests));
        }

        router.layer(TraceLayer::new_for_http())
    }

    pub fn settings(&self) -> &ListenerSettings {
        &self.settings
    }

    /// The complete router, for embedding or testing without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Extend or wrap the assembled router before the server starts.
    pub fn map_router(&mut self, f: impl FnOnce(Router) -> Router) {
        let router = std::mem::take(&mut self.router);
        self.router = f(router);
    }

    /// Bind the listener and serve until `handle` is shut down.
    pub async fn run(self, handle: Handle) -> Result<(), ServeError> {
        let addr = resolve(&self.settings.bind_address()).await?;
        let app = self
            .router
            .into_make_service_with_connect_info::<ConnectionInfo>();

        match &self.settings.tls {
            Some(tls) => {
                let rustls = tls.rustls_config()?;
                let mut server = axum_server::bind_rustls(addr, rustls).handle(handle);
                tune_http1(server.http_builder(), &self.settings);
                server.serve(app).await?;
            }
            None => {
                let mut server = axum_server::bind(addr).handle(handle);
                tune_http1(server.http_builder(), &self.settings);
                server.serve(app).await?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn metrics_route(config: &HttpServerConfig) -> Option<String> {
    config
        .metrics_enabled
        .then(|| join_route(&config.root_context, "/metrics"))
}

fn check_overlaps(
    config: &HttpServerConfig,
    settings: &ListenerSettings,
    routes: &AppRoutes,
) -> Result<(), DeploymentError> {
    let root = config.root_context.as_str();
    let metrics = metrics_route(config);

    if let Some(add_on) = &settings.websocket {
        for endpoint in add_on.endpoints() {
            let route = endpoint.route.as_str();
            if routes.occupies(root, route) || metrics.as_deref() == Some(route) {
                return Err(DeploymentError::RouteTaken {
                    path: route.to_string(),
                    owner: format!("WebSocket endpoint {}", endpoint.descriptor.handler_id()),
                });
            }
        }
    }

    if let Some(path) = metrics {
        if routes.occupies(root, &path) {
            return Err(DeploymentError::RouteTaken {
                path,
                owner: "metrics endpoint".to_string(),
            });
        }
    }
    Ok(())
}

fn tune_http1(
    builder: &mut hyper_util::server::conn::auto::Builder<hyper_util::rt::TokioExecutor>,
    settings: &ListenerSettings,
) {
    let mut http1 = builder.http1();
    http1.keep_alive(settings.keep_alive.enabled);
    if let Some(size) = settings.header_buffer_size() {
        http1.max_buf_size(size);
    }
    if let Some(idle) = settings.keep_alive.idle_timeout {
        http1.timer(TokioTimer::new()).header_read_timeout(idle);
    }
}

async fn resolve(address: &str) -> Result<SocketAddr, ServeError> {
    tokio::net::lookup_host(address)
        .await
        .map_err(|source| ServeError::Resolve {
            address: address.to_string(),
            source,
        })?
        .next()
        .ok_or_else(|| ServeError::NoAddress(address.to_string()))
}
