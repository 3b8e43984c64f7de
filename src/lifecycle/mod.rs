//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Parse args → Load config → Bootstrap → Assemble listener
//!     → Arm shutdown hook → Start services → Bind → Block
//!
//! Shutdown (shutdown.rs):
//!     Signal or serve failure → Stop listener (no drain) → Stop services
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Run the shutdown hook
//! ```
//!
//! # Design Decisions
//! - The shutdown hook exists before any service starts
//! - Services start without waiting; stop waits per service, bounded
//! - State transitions are observable through a watch channel

pub mod services;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod state;

pub use services::{BoxError, ManagedService, ManagedServices, StopOutcome, StopReport};
pub use shutdown::{Shutdown, ShutdownHook};
pub use startup::{launch, run_server, LifecycleController, ServeOutcome, ServerAssembly, StartupError};
pub use state::LifecycleState;
