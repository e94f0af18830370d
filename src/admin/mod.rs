//! Admin HTTP endpoint.
//!
//! # Responsibilities
//! - Serve `GET /metrics` in Prometheus text format when configured
//! - Answer every other path with 404
//!
//! # Design Decisions
//! - Bound during startup so a taken port is a startup error
//! - Runs on the acceptor loop and stops with the listener

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::AdminHttpConfig;
use crate::lifecycle::shutdown::ShutdownSignal;
use crate::net::transport::{EventLoopGroup, TransportError};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Histogram buckets are compacted on this period.
const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

pub fn admin_router(prometheus: Option<PrometheusHandle>) -> Router {
    let router = match prometheus {
        Some(handle) => Router::new().route("/metrics", get(get_metrics)).with_state(handle),
        None => Router::new(),
    };
    router
        .fallback(|| async { StatusCode::NOT_FOUND })
        .layer(TraceLayer::new_for_http())
}

async fn get_metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], handle.render())
}

/// A bound admin server that has not started serving yet.
pub struct AdminServer {
    listener: std::net::TcpListener,
    local_addr: SocketAddr,
    prometheus: Option<PrometheusHandle>,
}

impl AdminServer {
    pub fn bind(config: &AdminHttpConfig, prometheus: Option<PrometheusHandle>) -> io::Result<Self> {
        let addrs: Vec<SocketAddr> = (config.host.as_str(), config.port).to_socket_addrs()?.collect();
        let listener = std::net::TcpListener::bind(&addrs[..])?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            prometheus,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve on the acceptor loop until `shutdown` fires.
    pub fn start(self, acceptor: &EventLoopGroup, shutdown: ShutdownSignal) -> Result<(), TransportError> {
        let Self {
            listener,
            local_addr,
            prometheus,
        } = self;

        acceptor.execute(Box::new(move |handle| {
            if let Some(prometheus) = prometheus.clone() {
                let mut stop = shutdown.clone();
                handle.spawn(async move {
                    let mut ticks = tokio::time::interval(UPKEEP_INTERVAL);
                    loop {
                        tokio::select! {
                            _ = ticks.tick() => prometheus.run_upkeep(),
                            _ = stop.wait() => break,
                        }
                    }
                });
            }

            handle.spawn(async move {
                let listener = match TcpListener::from_std(listener) {
                    Ok(listener) => listener,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to register admin listener");
                        return;
                    }
                };
                tracing::info!(address = %local_addr, "Admin HTTP server starting");

                let mut stop = shutdown;
                let served = axum::serve(listener, admin_router(prometheus))
                    .with_graceful_shutdown(async move { stop.wait().await })
                    .await;
                match served {
                    Ok(()) => tracing::info!("Admin HTTP server stopped"),
                    Err(e) => tracing::error!(error = %e, "Admin HTTP server failed"),
                }
            });
        }))
    }
}
