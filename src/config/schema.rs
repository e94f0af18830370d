//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::net::transport::TransportKind;
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Client-facing listener (address, TLS, tuning).
    pub proxy: ListenerConfig,

    /// Target clusters by name. Exactly one is supported.
    pub clusters: BTreeMap<String, ClusterConfig>,

    /// Filter chain, in order from client to broker.
    pub filters: Vec<FilterDefinition>,

    /// Admin HTTP endpoint. Absent means no admin server.
    pub admin_http: Option<AdminHttpConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ProxyConfig {
    /// The single configured cluster, if any.
    pub fn cluster(&self) -> Option<(&str, &ClusterConfig)> {
        self.clusters.iter().next().map(|(name, cluster)| (name.as_str(), cluster))
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address as `host:port` (e.g., "localhost:9192").
    pub address: String,

    /// PEM bundle with certificate chain and private key. Enables TLS.
    pub key_store_file: Option<PathBuf>,

    /// Password for the key store.
    pub key_password: Option<String>,

    /// Trace raw byte counts on both legs.
    pub log_network: bool,

    /// Log every decoded frame.
    pub log_frames: bool,

    /// Force a specific I/O backend instead of the platform default.
    pub transport: Option<TransportKind>,

    /// Worker loop count. Defaults to available parallelism.
    pub worker_threads: Option<usize>,

    /// Largest frame accepted on either leg, in bytes.
    pub max_frame_size: usize,

    /// Upstream connect timeout per bootstrap server, in milliseconds.
    pub connect_timeout_ms: u64,

    /// How long shutdown waits for open connections, in milliseconds.
    pub shutdown_grace_ms: u64,

    /// Outbound buffer watermarks (backpressure).
    pub write_buffer: WriteBufferConfig,
}

impl ListenerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:9192".to_string(),
            key_store_file: None,
            key_password: None,
            log_network: false,
            log_frames: false,
            transport: None,
            worker_threads: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            connect_timeout_ms: 10_000,
            shutdown_grace_ms: 2_000,
            write_buffer: WriteBufferConfig::default(),
        }
    }
}

/// Outbound buffer watermarks, in bytes.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct WriteBufferConfig {
    /// Reads resume once the peer's buffer drops below this.
    pub low_watermark: usize,

    /// Reads pause once the peer's buffer exceeds this.
    pub high_watermark: usize,
}

impl Default for WriteBufferConfig {
    fn default() -> Self {
        Self {
            low_watermark: 32 * 1024,
            high_watermark: 64 * 1024,
        }
    }
}

/// A target cluster.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClusterConfig {
    /// Comma-separated `host:port` list, tried in order.
    pub bootstrap_servers: String,
}

impl ClusterConfig {
    pub fn bootstrap_addresses(&self) -> Result<Vec<HostPort>, HostPortError> {
        self.bootstrap_servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

/// One `[[filters]]` entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilterDefinition {
    /// Registered filter type name.
    #[serde(rename = "type")]
    pub filter_type: String,

    /// Filter-specific settings.
    #[serde(default)]
    pub config: toml::Table,
}

/// Admin HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminHttpConfig {
    pub host: String,

    /// `0` picks an ephemeral port.
    pub port: u16,

    pub endpoints: AdminEndpoints,
}

impl Default for AdminHttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9193,
            endpoints: AdminEndpoints::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AdminEndpoints {
    /// Present means `GET /metrics` is served.
    pub prometheus: Option<PrometheusEndpoint>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PrometheusEndpoint {}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Output format.
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostPortError {
    #[error("`{0}` is not of the form host:port")]
    MissingPort(String),

    #[error("`{0}` has an empty host")]
    EmptyHost(String),

    #[error("`{0}` has an invalid port")]
    InvalidPort(String),
}

/// A `host:port` pair. IPv6 hosts may be bracketed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl FromStr for HostPort {
    type Err = HostPortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| HostPortError::MissingPort(s.to_string()))?;
        let host = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);
        if host.is_empty() {
            return Err(HostPortError::EmptyHost(s.to_string()));
        }
        let port = port.parse().map_err(|_| HostPortError::InvalidPort(s.to_string()))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
