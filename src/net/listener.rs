//! Client-facing TCP listener.
//!
//! # Responsibilities
//! - Bind to the configured address (fatal at startup if it fails)
//! - Accept incoming TCP connections on the acceptor loop
//! - Hand each socket to a worker loop, round-robin, for its whole life
//! - Graceful handling of accept errors

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};

use super::pipeline::ProxyInitializer;
use super::transport::{Dispatcher, EventLoopGroup, TransportError};
use crate::config::HostPort;
use crate::lifecycle::shutdown::ShutdownSignal;
use crate::observability::metrics;

/// Pause after a failed accept, so descriptor exhaustion does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to resolve {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
}

/// A bound listener that has not started accepting yet.
#[derive(Debug)]
pub struct ProxyListener {
    inner: std::net::TcpListener,
    local_addr: SocketAddr,
}

impl ProxyListener {
    /// Bind synchronously, so a taken port fails startup rather than the acceptor loop.
    pub fn bind(address: &HostPort) -> Result<Self, ListenerError> {
        let addrs: Vec<SocketAddr> = (address.host.as_str(), address.port)
            .to_socket_addrs()
            .map_err(|source| ListenerError::Resolve {
                address: address.to_string(),
                source,
            })?
            .collect();

        let bind_error = |source| ListenerError::Bind {
            address: address.to_string(),
            source,
        };
        let inner = std::net::TcpListener::bind(&addrs[..]).map_err(bind_error)?;
        inner.set_nonblocking(true).map_err(bind_error)?;
        let local_addr = inner.local_addr().map_err(bind_error)?;

        tracing::info!(address = %local_addr, "Listener bound");
        Ok(Self { inner, local_addr })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start the accept loop on `acceptor`. It stops when `shutdown` fires.
    pub fn start(
        self,
        acceptor: &EventLoopGroup,
        workers: Dispatcher,
        initializer: Arc<ProxyInitializer>,
        shutdown: ShutdownSignal,
    ) -> Result<(), TransportError> {
        let std_listener = self.inner;
        acceptor.execute(Box::new(move |handle| {
            handle.spawn(async move {
                match TcpListener::from_std(std_listener) {
                    Ok(listener) => accept_loop(listener, workers, initializer, shutdown).await,
                    Err(e) => tracing::error!(error = %e, "Failed to register listener"),
                }
            });
        }))
    }
}

async fn accept_loop(
    listener: TcpListener,
    workers: Dispatcher,
    initializer: Arc<ProxyInitializer>,
    mut shutdown: ShutdownSignal,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.wait() => break,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                continue;
            }
        };
        metrics::connection_accepted();

        // Sockets are registered with the loop that accepted them; move to the worker's reactor.
        let stream = match stream.into_std() {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Failed to detach accepted socket");
                continue;
            }
        };
        let initializer = Arc::clone(&initializer);
        let signal = shutdown.clone();
        let dispatched = workers.execute(Box::new(move |handle| match TcpStream::from_std(stream) {
            Ok(stream) => handle.spawn(initializer.handle(stream, peer, signal)),
            Err(e) => tracing::warn!(peer = %peer, error = %e, "Failed to register accepted socket"),
        }));
        if let Err(e) = dispatched {
            tracing::warn!(error = %e, "Worker loops gone, stopping accept loop");
            break;
        }
    }
    tracing::info!(address = ?listener.local_addr().ok(), "Listener closed");
}
