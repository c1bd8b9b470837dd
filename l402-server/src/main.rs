//! L402 paywall HTTP server.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! L402_SECRET_KEY=$(openssl rand -hex 32) cargo run -p l402-server --release
//!
//! # Run with custom config path
//! cargo run -p l402-server -- --config /path/to/config.toml
//!
//! # Configure logging level
//! RUST_LOG=debug cargo run -p l402-server
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG`: Path to TOML configuration file (default: `config.toml`)
//! - `HOST`: Override bind address (default: `0.0.0.0`)
//! - `PORT`: Override port (default: `3000`)
//! - `RUST_LOG`: Log level filter (default: `info`)

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::http::{Method, header};
use clap::Parser;
use tower_http::cors;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use l402_server::build_app;
use l402_server::config::ServerConfig;

/// L402 paywall server.
#[derive(Parser, Debug)]
#[command(name = "l402-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "CONFIG", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        tracing::error!("Server failed: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::load_from(&args.config)?;
    tracing::info!(
        config = %args.config.display(),
        host = %config.host,
        port = config.port,
        price = config.price,
        routes = ?config.routes,
        "Loaded configuration"
    );

    let app = build_app(&config)?;
    let _sweeper = app.store.spawn_sweeper(config.sweep_interval());

    let router = app.router.layer(TraceLayer::new_for_http()).layer(
        cors::CorsLayer::new()
            .allow_origin(cors::Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(cors::Any)
            .expose_headers([header::WWW_AUTHENTICATE]),
    );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Paywall listening on http://{addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Paywall shut down gracefully");
    Ok(())
}

/// Waits for Ctrl-C or SIGTERM (Unix) to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down..."),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl-C");
        tracing::info!("Received Ctrl-C, shutting down...");
    }
}
