//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (connections, frames, filter latency, backpressure, errors)
//! - Install the Prometheus recorder backing the admin endpoint
//!
//! # Metrics
//! - `krpc_proxy_connections_accepted_total` (counter)
//! - `krpc_proxy_active_connections` (gauge): current connection count
//! - `krpc_proxy_frames_total` (counter): frames by direction, api key
//! - `krpc_proxy_frames_dropped_total` (counter): frames a filter swallowed, by direction
//! - `krpc_proxy_short_circuit_responses_total` (counter): responses produced by filters
//! - `krpc_proxy_filter_chain_duration_seconds` (histogram): chain latency by direction
//! - `krpc_proxy_reads_suspended_total` (counter): read gate closures by leg
//! - `krpc_proxy_connection_errors_total` (counter): connection failures by kind
//! - `krpc_proxy_upstream_connect_failures_total` (counter)
//!
//! # Design Decisions
//! - Updates go through the `metrics` facade and are no-ops until a recorder is installed
//! - The recorder is process-global, so it is installed at most once and reused by later runtimes

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub const CONNECTIONS_ACCEPTED: &str = "krpc_proxy_connections_accepted_total";
pub const ACTIVE_CONNECTIONS: &str = "krpc_proxy_active_connections";
pub const FRAMES: &str = "krpc_proxy_frames_total";
pub const FRAMES_DROPPED: &str = "krpc_proxy_frames_dropped_total";
pub const SHORT_CIRCUIT_RESPONSES: &str = "krpc_proxy_short_circuit_responses_total";
pub const FILTER_CHAIN_DURATION: &str = "krpc_proxy_filter_chain_duration_seconds";
pub const READS_SUSPENDED: &str = "krpc_proxy_reads_suspended_total";
pub const CONNECTION_ERRORS: &str = "krpc_proxy_connection_errors_total";
pub const UPSTREAM_CONNECT_FAILURES: &str = "krpc_proxy_upstream_connect_failures_total";

static PROMETHEUS: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Frame direction label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Request => "request",
            Direction::Response => "response",
        }
    }
}

/// Install the Prometheus recorder, or return the one already installed.
pub fn install_prometheus() -> Result<PrometheusHandle, BuildError> {
    let mut installed = PROMETHEUS.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = installed.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    *installed = Some(handle.clone());
    tracing::debug!("Prometheus recorder installed");
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!(CONNECTIONS_ACCEPTED, "Client connections accepted by the listener");
    describe_gauge!(ACTIVE_CONNECTIONS, "Client connections currently open");
    describe_counter!(FRAMES, "Frames read from either leg");
    describe_counter!(FRAMES_DROPPED, "Frames swallowed by a filter");
    describe_counter!(SHORT_CIRCUIT_RESPONSES, "Responses produced by a filter instead of the broker");
    describe_histogram!(FILTER_CHAIN_DURATION, Unit::Seconds, "Time for a frame to pass the filter chain");
    describe_counter!(READS_SUSPENDED, "Times a leg stopped reading because its peer was backed up");
    describe_counter!(CONNECTION_ERRORS, "Connections closed by an error");
    describe_counter!(UPSTREAM_CONNECT_FAILURES, "Failed attempts to reach a bootstrap server");
}

pub fn connection_accepted() {
    counter!(CONNECTIONS_ACCEPTED).increment(1);
}

pub fn connection_opened() {
    gauge!(ACTIVE_CONNECTIONS).increment(1.0);
}

pub fn connection_closed() {
    gauge!(ACTIVE_CONNECTIONS).decrement(1.0);
}

pub fn frame(direction: Direction, api_key: i16) {
    counter!(FRAMES, "direction" => direction.as_str(), "api_key" => api_key.to_string()).increment(1);
}

pub fn frame_dropped(direction: Direction) {
    counter!(FRAMES_DROPPED, "direction" => direction.as_str()).increment(1);
}

pub fn short_circuit_response() {
    counter!(SHORT_CIRCUIT_RESPONSES).increment(1);
}

pub fn filter_chain_duration(direction: Direction, elapsed: Duration) {
    histogram!(FILTER_CHAIN_DURATION, "direction" => direction.as_str()).record(elapsed.as_secs_f64());
}

pub fn read_suspended(leg: &'static str) {
    counter!(READS_SUSPENDED, "leg" => leg).increment(1);
}

pub fn connection_error(kind: &'static str) {
    counter!(CONNECTION_ERRORS, "kind" => kind).increment(1);
}

pub fn upstream_connect_failure() {
    counter!(UPSTREAM_CONNECT_FAILURES).increment(1);
}
