//! SleepSync bridge - serial to WebSocket relay.
//!
//! Run with: `cargo run -p sleepsync-bridge`

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use sleepsync_bridge::{api, ws, AppState, Config, Relay};
use sleepsync_link::LinkSupervisor;

/// SleepSync bridge - relays JSON between the sleep tracker and web clients.
#[derive(Parser, Debug)]
#[command(name = "sleepsync-bridge")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP API bind address (overrides config).
    #[arg(long)]
    http_bind: Option<String>,

    /// WebSocket bind address (overrides config).
    #[arg(long)]
    ws_bind: Option<String>,

    /// Serial port path (overrides auto-detection).
    #[arg(short, long)]
    port: Option<String>,

    /// Serial baud rate (overrides config).
    #[arg(short, long)]
    baud: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sleepsync_bridge=info".parse()?)
                .add_directive("sleepsync_link=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    // Override config with CLI args
    if let Some(http_bind) = args.http_bind {
        config.server.http_bind = http_bind;
    }
    if let Some(ws_bind) = args.ws_bind {
        config.server.ws_bind = ws_bind;
    }
    if let Some(port) = args.port {
        config.link.port = Some(port);
    }
    if let Some(baud) = args.baud {
        config.link.baud = baud;
    }
    config.validate()?;

    // Start the serial link supervisor
    let link = LinkSupervisor::spawn(config.link.to_link_config());

    // Create application state and start the relay
    let state = AppState::new(link.clone(), config.clone());
    Relay::new(Arc::clone(&state)).start();

    // HTTP listener: REST API plus WebSocket upgrades at /ws
    let app = Router::new()
        .merge(api::router())
        .merge(ws::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(Arc::clone(&state));

    // Dedicated WebSocket listener, upgrades at /
    let ws_app = ws::standalone_router(Arc::clone(&state));

    let http_addr: SocketAddr = config.server.http_bind.parse()?;
    let ws_addr: SocketAddr = config.server.ws_bind.parse()?;

    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    let ws_listener = tokio::net::TcpListener::bind(ws_addr).await?;

    info!("HTTP API listening on {}", http_addr);
    info!("WebSocket listening on {}", ws_addr);

    // Both servers stop on Ctrl-C
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
            }
            shutdown.cancel();
        }
    });

    let http_server = axum::serve(http_listener, app).with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move { shutdown.cancelled().await }
    });
    let ws_server = axum::serve(ws_listener, ws_app).with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move { shutdown.cancelled().await }
    });

    tokio::try_join!(http_server.into_future(), ws_server.into_future())?;

    link.shutdown();
    info!("bridge stopped");

    Ok(())
}
