//! Application bootstrap and HTTP/WebSocket server lifecycle.
//!
//! An [`Application`] supplies its configuration type and a setup callback.
//! [`launch`] parses the command line, loads the configuration, runs the
//! callback, assembles the listener (limits, TLS, compression, WebSocket
//! endpoints, static files), starts managed services and serves until a
//! termination signal arrives.

pub mod application;
pub mod cli;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use application::{Application, Bootstrap};
pub use config::{AppConfiguration, ServerConfig};
pub use http::{ApiError, AppRoutes, Endpoint, EndpointDescriptor, HttpServer, ServerEndpoint, Session};
pub use lifecycle::{launch, BoxError, LifecycleController, LifecycleState, ManagedService};
