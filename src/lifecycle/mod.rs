//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Select transport → TLS → Bind → Filters → Metrics → Event loops → Accept
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Stop accepting → Close connections → Join event loops → Release block()
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - The runtime is an explicit value owned by the caller, not process state
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has a grace period: event loops stop waiting for tasks after it

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use startup::{LifecycleError, ProxyRuntime, StartupError};
