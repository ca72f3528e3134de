//! Storefront security gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────┐
//!                      │                 STOREFRONT GUARD                 │
//!                      │                                                  │
//!   Client Request     │  ┌────────┐   ┌──────────────────────────────┐   │
//!   ───────────────────┼─▶│  http  │──▶│      security pipeline       │   │
//!                      │  │ server │   │ rate limit → CSRF → XSS →    │   │
//!                      │  └────────┘   │ sanitize (policy per class)  │   │
//!                      │               └──────────────┬───────────────┘   │
//!                      │                              ▼                   │
//!   Client Response    │  ┌──────────────────┐   ┌──────────────┐         │
//!   ◀──────────────────┼──│ security headers │◀──│   upstream   │◀────────┼── Storefront
//!                      │  └──────────────────┘   │  forwarding  │         │
//!                      │                         └──────────────┘         │
//!                      │                                                  │
//!                      │  config · observability · lifecycle · admin      │
//!                      └──────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use storefront_guard::config::loader::{default_config, load_config};
use storefront_guard::lifecycle::{shutdown_signal, Shutdown};
use storefront_guard::observability::{logging, metrics};
use storefront_guard::HttpServer;

#[derive(Parser)]
#[command(name = "storefront-guard", version)]
#[command(about = "Security gateway for a storefront backend", long_about = None)]
struct Args {
    /// Path to a TOML configuration file; built-in defaults are used without one
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => default_config()?,
    };

    logging::init(&config.observability);

    tracing::info!("storefront-guard v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.url,
        production = config.security.production,
        request_timeout_secs = config.timeouts.request_secs,
        route_classes = config.effective_route_classes().len(),
        "Configuration loaded"
    );
    if config.admin.enabled && config.admin.api_key.is_empty() {
        tracing::warn!("Admin API enabled without an api_key; every request will be refused");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(config, shutdown.clone())?;

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.trigger();
    });

    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
