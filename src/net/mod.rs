//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! HttpServerConfig
//!     → builder.rs (limits, keep-alive)
//!     → tls.rs (TLS policy, rustls config at bind time)
//!     → compression.rs (compression policy)
//!     → ListenerSettings (handed to the lifecycle controller)
//!
//! Per accepted connection:
//!     connection.rs (ID, keep-alive request budget)
//! ```
//!
//! # Design Decisions
//! - Listener assembly is pure and fails fast on bad configuration
//! - TLS material is only read when the listener binds

pub mod builder;
pub mod compression;
pub mod connection;
pub mod tls;

pub use builder::{build_listener, configure_listener, KeepAlive, ListenerConfigError, ListenerSettings};
pub use compression::{CompressionMode, CompressionPolicy};
pub use connection::{ConnectionId, ConnectionInfo};
pub use tls::{TlsError, TlsPolicy};
