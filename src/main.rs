//! zero-gateway
//!
//! Identity-aware reverse proxy. Every request to a protected service is
//! authenticated (session cookie or signed headers) and checked against
//! policy before it reaches an upstream server.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────────┐
//!                       │                    ZERO GATEWAY                       │
//!                       │                                                       │
//!   Client Request      │  ┌─────────┐   ┌──────────┐   ┌──────────────────┐    │
//!   ────────────────────┼─▶│ net/tls │──▶│  http    │──▶│ proxy dispatcher │    │
//!                       │  │  (SNI)  │   │  server  │   │   (host match)   │    │
//!                       │  └─────────┘   └──────────┘   └────────┬─────────┘    │
//!                       │                                        │              │
//!                       │                                        ▼              │
//!                       │  ┌──────────────┐   ┌──────────┐   ┌──────────────┐   │
//!                       │  │ auth         │──▶│  policy  │──▶│  transport / │───┼──▶ Upstream
//!                       │  │ sig / session│   │  engine  │   │  websocket   │   │    Server
//!                       │  └──────────────┘   └──────────┘   └──────────────┘   │
//!                       │                                                       │
//!                       │  ┌─────────────────────────────────────────────────┐  │
//!                       │  │ config + watcher │ events │ audit │ observability │ │
//!                       │  └─────────────────────────────────────────────────┘  │
//!                       └──────────────────────────────────────────────────────┘
//! ```

use axum_server::Handle;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use zero_gateway::audit::TracingAuditSink;
use zero_gateway::config::{load_config, ConfigWatcher};
use zero_gateway::geo::StaticGeoResolver;
use zero_gateway::lifecycle::signals::spawn_signal_handler;
use zero_gateway::lifecycle::{Gateway, Shutdown};
use zero_gateway::observability::{logging, metrics};
use zero_gateway::routing::self_cert;
use zero_gateway::store::MemoryStore;

#[derive(Parser)]
#[command(name = "zero-gateway")]
#[command(about = "Zero trust access gateway", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "/etc/zero-gateway.toml")]
    config: PathBuf,

    /// Do not reload the configuration when the file changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    logging::init_logging(&config.observability);

    tracing::info!("zero-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        path = ?cli.config,
        bind_address = %config.listener.bind_address,
        protocol = %config.listener.protocol,
        max_connections = config.listener.max_connections,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let fallback = self_cert::load_or_generate(
        Path::new(&config.tls.self_cert_path),
        Path::new(&config.tls.self_key_path),
    )?;
    let store = Arc::new(MemoryStore::from_config(&config));
    let geo = Arc::new(StaticGeoResolver::new(config.geo.clone()));

    let gateway = Gateway::build(config, store, geo, Arc::new(TracingAuditSink), fallback).await?;

    // The watcher stops when dropped, keep it for the life of the server.
    let (updates, _watcher) = if cli.no_watch {
        (None, None)
    } else {
        let (watcher, rx) = ConfigWatcher::new(&cli.config);
        (Some(rx), Some(watcher.run()?))
    };

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    gateway.run(Handle::new(), shutdown, updates).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
