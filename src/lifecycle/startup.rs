//! Startup orchestration and the runtime handle.
//!
//! # Responsibilities
//! - Resolve transport, TLS, filters and metrics from configuration
//! - Start the acceptor and worker event loops
//! - Bind listeners and begin accepting traffic
//! - Drain and stop everything on shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and leaves the runtime stopped
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)
//! - Shutdown order: stop accepting, drain workers, release `block()`

use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use metrics_exporter_prometheus::BuildError;
use thiserror::Error;

use super::shutdown::Shutdown;
use crate::admin::AdminServer;
use crate::config::{validate_config, HostPort, HostPortError, ProxyConfig, ValidationError};
use crate::filter::{FilterChainFactory, FilterConfigError, FilterRegistry, FilterSetup};
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{ListenerError, ProxyListener};
use crate::net::pipeline::{PipelineSettings, ProxyInitializer};
use crate::net::tls::{build_server_context, TlsError};
use crate::net::transport::{EventLoopGroup, TransportError, TransportKind};
use crate::observability::metrics;

const ACCEPTOR_LOOP: &str = "krpc-acceptor";
const WORKER_LOOP: &str = "krpc-worker";

/// Fatal errors raised by [`ProxyRuntime::startup`].
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("proxy is already running")]
    AlreadyRunning,

    #[error("invalid configuration: {}", join(.0))]
    Config(Vec<ValidationError>),

    #[error("no cluster configured")]
    NoCluster,

    #[error("invalid address: {0}")]
    Address(#[from] HostPortError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Filter(#[from] FilterConfigError),

    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] BuildError),

    #[error("failed to bind admin endpoint {address}: {source}")]
    AdminBind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Misuse of the lifecycle API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("proxy is not running")]
    NotRunning,
}

/// Set once when the proxy has fully stopped.
#[derive(Debug, Default)]
struct Latch {
    done: Mutex<bool>,
    released: Condvar,
}

impl Latch {
    fn release(&self) {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.released.notify_all();
    }

    fn wait(&self) {
        let done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        let _done = self
            .released
            .wait_while(done, |done| !*done)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

struct Running {
    shutdown: Shutdown,
    acceptor: EventLoopGroup,
    workers: EventLoopGroup,
    local_addr: SocketAddr,
    admin_addr: Option<SocketAddr>,
    stopped: Arc<Latch>,
}

/// Owns a proxy instance from startup to shutdown.
pub struct ProxyRuntime {
    config: ProxyConfig,
    registry: FilterRegistry,
    tracker: ConnectionTracker,
    state: Mutex<Option<Running>>,
}

impl ProxyRuntime {
    /// A runtime using the built-in filters.
    pub fn new(config: ProxyConfig) -> Self {
        Self::with_registry(config, FilterRegistry::with_builtins())
    }

    /// A runtime resolving `[[filters]]` against a custom registry.
    pub fn with_registry(config: ProxyConfig, registry: FilterRegistry) -> Self {
        Self {
            config,
            registry,
            tracker: ConnectionTracker::new(),
            state: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, Option<Running>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start accepting connections. Returns the bound proxy address.
    pub fn startup(&self) -> Result<SocketAddr, StartupError> {
        let mut state = self.state();
        if state.is_some() {
            return Err(StartupError::AlreadyRunning);
        }

        let config = &self.config;
        validate_config(config).map_err(StartupError::Config)?;

        let transport = TransportKind::select(config.proxy.transport)?;
        tracing::info!(transport = %transport, "Transport selected");

        let address: HostPort = config.proxy.address.parse()?;
        let (cluster, cluster_config) = config.cluster().ok_or(StartupError::NoCluster)?;
        let upstreams = cluster_config.bootstrap_addresses()?;
        tracing::info!(cluster, bootstrap_servers = %cluster_config.bootstrap_servers, "Cluster configured");

        let tls = match &config.proxy.key_store_file {
            Some(path) => Some(build_server_context(path, config.proxy.key_password.as_deref())?),
            None => None,
        };

        let listener = ProxyListener::bind(&address)?;
        let local_addr = listener.local_addr();

        let setup = FilterSetup {
            proxy_host: address.host.clone(),
            proxy_port: local_addr.port(),
        };
        let chain_factory = FilterChainFactory::from_config(&config.filters, &self.registry, &setup)?;
        tracing::info!(filters = chain_factory.len(), "Filter chain resolved");

        let admin = match &config.admin_http {
            Some(admin) => {
                let prometheus = match admin.endpoints.prometheus {
                    Some(_) => Some(metrics::install_prometheus()?),
                    None => None,
                };
                let server = AdminServer::bind(admin, prometheus).map_err(|source| StartupError::AdminBind {
                    address: format!("{}:{}", admin.host, admin.port),
                    source,
                })?;
                Some(server)
            }
            None => None,
        };

        let grace = config.proxy.shutdown_grace();
        let acceptor = EventLoopGroup::new(ACCEPTOR_LOOP, 1, grace)?;
        let workers = EventLoopGroup::new(WORKER_LOOP, config.proxy.worker_count(), grace)?;

        let initializer = Arc::new(ProxyInitializer::new(
            upstreams,
            tls,
            Arc::new(chain_factory),
            PipelineSettings::from_config(&config.proxy),
            self.tracker.clone(),
        ));

        let shutdown = Shutdown::new();
        let admin_addr = admin.as_ref().map(AdminServer::local_addr);
        if let Some(admin) = admin {
            admin.start(&acceptor, shutdown.subscribe())?;
            tracing::info!(address = ?admin_addr, "Admin endpoint listening");
        }
        listener.start(&acceptor, workers.dispatcher(), initializer, shutdown.subscribe())?;

        tracing::info!(
            address = %local_addr,
            workers = workers.len(),
            tls = config.proxy.key_store_file.is_some(),
            "Proxy started"
        );

        *state = Some(Running {
            shutdown,
            acceptor,
            workers,
            local_addr,
            admin_addr,
            stopped: Arc::new(Latch::default()),
        });
        Ok(local_addr)
    }

    /// Wait until the proxy has been shut down.
    pub fn block(&self) -> Result<(), LifecycleError> {
        let stopped = match self.state().as_ref() {
            Some(running) => Arc::clone(&running.stopped),
            None => return Err(LifecycleError::NotRunning),
        };
        stopped.wait();
        Ok(())
    }

    /// Stop accepting, close every connection, and join all event loops.
    pub fn shutdown(&self) -> Result<(), LifecycleError> {
        let running = self.state().take().ok_or(LifecycleError::NotRunning)?;
        tracing::info!(active_connections = self.tracker.active_count(), "Shutting down");

        running.shutdown.trigger();
        running.acceptor.shutdown_gracefully();
        running.workers.shutdown_gracefully();
        running.stopped.release();

        tracing::info!("Shutdown complete");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state().is_some()
    }

    /// Bound proxy address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state().as_ref().map(|running| running.local_addr)
    }

    /// Bound admin address while running, if the admin endpoint is enabled.
    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.state().as_ref().and_then(|running| running.admin_addr)
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }
}
