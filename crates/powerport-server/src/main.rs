//! powerport-server - PowerPort panel backend
//!
//! Versioned REST API plus the console/stats WebSocket relays to node daemons.

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use powerport_core::{auth, panel, SqliteKv, Store};

mod config;
mod error;
mod middleware;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("powerport_server=info".parse()?)
                .add_directive("powerport_core=info".parse()?),
        )
        .init();

    info!("powerport-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = config::Config::load()?;
    info!("Config loaded from {:?}", config.config_path);

    let kv = SqliteKv::open_path(&config.database_path)?;
    let store = Store::new(Arc::new(kv));
    info!("Database opened at {:?}", config.database_path);

    let panel = panel::init(&store, env!("CARGO_PKG_VERSION")).await?;
    info!(powerport_id = %panel.powerport_id, "Panel identity ready");

    if auth::bootstrap_api_key(&store, &config.api_key_file).await?.is_some() {
        info!("No API keys found; issued one and wrote it to {:?}", config.api_key_file);
    }

    let poll_interval = config.node_poll_interval();
    let addr = config.listen_addr();
    let state = state::AppState::new(config, store)?;

    let poller = services::NodePoller::new(Arc::clone(&state));
    if let Some(every) = poll_interval {
        poller.start(every).await;
    }

    let app = routes::create_router(state);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down...");
        })
        .await?;

    poller.stop().await;
    Ok(())
}
