//! krpc-proxy: a Kafka-protocol-aware transparent proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                      KRPC PROXY                      │
//!                     │                                                      │
//!   Kafka client      │  ┌──────────┐   ┌──────────┐   ┌──────────────────┐  │
//!   ──────────────────┼─▶│   net    │──▶│ protocol │──▶│  filter chain    │──┼──▶ Broker
//!                     │  │ listener │   │  codecs  │   │ (per connection) │  │
//!   ◀─────────────────┼──│ + tls    │◀──│          │◀──│                  │◀─┼───
//!                     │  └──────────┘   └──────────┘   └──────────────────┘  │
//!                     │                                                      │
//!                     │  ┌────────────────────────────────────────────────┐  │
//!                     │  │              Cross-Cutting Concerns            │  │
//!                     │  │  ┌────────┐ ┌──────────────┐ ┌──────────────┐  │  │
//!                     │  │  │ config │ │observability │ │    admin     │  │  │
//!                     │  │  └────────┘ └──────────────┘ └──────────────┘  │  │
//!                     │  │  ┌────────────────┐ ┌────────────────────────┐ │  │
//!                     │  │  │ future/promise │ │ lifecycle              │ │  │
//!                     │  │  └────────────────┘ └────────────────────────┘ │  │
//!                     │  └────────────────────────────────────────────────┘  │
//!                     └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use krpc_proxy::config::load_config;
use krpc_proxy::lifecycle::{signals, ProxyRuntime};
use krpc_proxy::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "krpc-proxy")]
#[command(about = "Kafka protocol proxy with pluggable filters", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("krpc-proxy: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.observability) {
        eprintln!("krpc-proxy: failed to initialise logging: {e}");
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = %cli.config.display(), "krpc-proxy starting");

    let runtime = Arc::new(ProxyRuntime::new(config));
    if let Err(e) = runtime.startup() {
        tracing::error!(error = %e, "Startup failed");
        eprintln!("krpc-proxy: {e}");
        return ExitCode::FAILURE;
    }

    if let Err(e) = signals::spawn_handler(Arc::clone(&runtime)) {
        tracing::warn!(error = %e, "Failed to install signal handler");
    }

    if let Err(e) = runtime.block() {
        tracing::error!(error = %e, "Proxy stopped unexpectedly");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
