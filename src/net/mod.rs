//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop on the acceptor event loop)
//!     → transport.rs (round-robin hand-off to a worker event loop)
//!     → pipeline.rs (TLS via tls.rs, upstream connect, frame pumps)
//!     → connection.rs (lifecycle tracking, state machine)
//!     → buffer.rs (outbound bytes per leg, read gate for the other leg)
//!     → ordering.rs (client-bound replies released in request order)
//!
//! Connection States:
//!     Accepting → Connecting → Proxying → Closing
//! ```
//!
//! # Design Decisions
//! - A connection never leaves the worker loop that received it
//! - Backpressure is per leg: a slow reader on one side pauses reads on the other
//! - Replies reach the client in request order, whether the broker or a filter produced them
//! - TLS is optional and terminated at the proxy

pub mod buffer;
pub mod connection;
pub mod listener;
pub mod ordering;
pub mod pipeline;
pub mod tls;
pub mod transport;

pub use listener::{ListenerError, ProxyListener};
pub use pipeline::{ConnectionError, PipelineSettings, ProxyInitializer};
pub use tls::{build_server_context, TlsError};
pub use transport::{EventLoopGroup, TransportError, TransportKind};
