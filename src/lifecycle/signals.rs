//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT)
//! - Translate the first signal into a runtime shutdown
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe) on a dedicated thread, since the
//!   proxy's own event loops stop during shutdown

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use super::startup::ProxyRuntime;

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

/// Shut `runtime` down on the first termination signal.
pub fn spawn_handler(runtime: Arc<ProxyRuntime>) -> io::Result<JoinHandle<()>> {
    let signals = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    std::thread::Builder::new()
        .name("krpc-signals".to_string())
        .spawn(move || {
            signals.block_on(wait_for_signal());
            if let Err(e) = runtime.shutdown() {
                tracing::debug!(error = %e, "Signal received after shutdown");
            }
        })
}
