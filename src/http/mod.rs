//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (router assembly, listener tuning, bind)
//!     → middleware/ (TRACE policy, request limits)
//!     → application routes under the root context
//!         → errors.rs (ApiError → ErrorMapper → response)
//!     → websocket.rs (upgrade → Endpoint::serve)
//! ```

pub mod errors;
pub mod middleware;
pub mod server;
pub mod websocket;

pub use errors::{ApiError, ErrorMapper, JsonErrorMapper, PrettyJson};
pub use server::{AppRoutes, HttpServer, ServeError};
pub use websocket::{
    DeclaredEndpoints, Endpoint, EndpointDescriptor, EndpointProvider, ServerEndpoint, Session,
};
