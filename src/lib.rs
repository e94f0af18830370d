//! Kafka-protocol-aware transparent proxy library.
//!
//! Clients connect to the proxy as if it were a broker; each connection gets
//! its own filter chain that may inspect, rewrite, drop or answer frames.

// Core subsystems
pub mod config;
pub mod future;
pub mod net;
pub mod protocol;

// Filters
pub mod filter;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use filter::{ProtocolFilter, RequestAction};
pub use lifecycle::{LifecycleError, ProxyRuntime, Shutdown, StartupError};
