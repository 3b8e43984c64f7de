//! Listener-level middleware applied ahead of the application router.

pub mod limits;
pub mod trace;

pub use limits::{request_limits_middleware, RequestLimits};
pub use trace::{trace_middleware, TracePolicy};
