//! Per-connection bookkeeping.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count requests served on each keep-alive connection
//! - Close a connection once its request budget is spent
//!
//! # Design Decisions
//! - State is created once per accepted connection through axum's
//!   `Connected` hook and dropped with the connection, so nothing leaks

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::connect_info::Connected;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue, Response};
use axum::middleware::Next;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is sufficient since we only need uniqueness.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection metadata attached to every request as `ConnectInfo`.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
    served: Arc<AtomicU64>,
}

impl ConnectionInfo {
    pub fn new(peer_addr: SocketAddr) -> Self {
        let id = ConnectionId::new();
        tracing::trace!(connection_id = %id, peer_addr = %peer_addr, "Connection accepted");
        Self {
            id,
            peer_addr,
            served: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record one more request on this connection and return the new total.
    pub fn record_request(&self) -> u64 {
        self.served.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn requests_served(&self) -> u64 {
        self.served.load(Ordering::SeqCst)
    }
}

impl Connected<SocketAddr> for ConnectionInfo {
    fn connect_info(target: SocketAddr) -> Self {
        Self::new(target)
    }
}

/// Keep-alive request budget shared by all connections of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestBudget {
    pub max_requests: u64,
}

/// Mark the response that exhausts a connection's budget with
/// `Connection: close`.
pub async fn enforce_request_budget(
    State(budget): State<RequestBudget>,
    request: Request,
    next: Next,
) -> Response<Body> {
    let served = request
        .extensions()
        .get::<ConnectInfo<ConnectionInfo>>()
        .map(|ConnectInfo(info)| (info.id, info.record_request()));

    let mut response = next.run(request).await;

    if let Some((id, served)) = served {
        if served >= budget.max_requests {
            tracing::debug!(connection_id = %id, served, "Keep-alive request budget spent");
            response
                .headers_mut()
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
        }
    }
    response
}
