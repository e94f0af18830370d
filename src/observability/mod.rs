//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, one span per connection)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → admin endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Connection id and peer address flow through every event via the connection span
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
