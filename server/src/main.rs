mod api;
mod config;
mod consumer;
mod error;
mod store;
mod ws;

use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tower_http::cors::CorsLayer;

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {}", e);
                let _ = ctrl_c.await;
                tracing::info!("Received SIGINT, shutting down...");
                return;
            }
        };
    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down..."),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("server=info".parse()?),
        )
        .init();

    let config = config::Config::from_env();
    tracing::info!(
        "Starting cell store on {} (default capacity {}, cache {} cells)",
        config.listen_addr,
        config.default_capacity,
        config.cell_cache_size
    );

    let valkey_client = redis::Client::open(config.valkey_url.as_str())?;
    let valkey_con = valkey_client.get_multiplexed_async_connection().await?;

    let (broadcast_tx, _) = broadcast::channel::<String>(4096);

    let store = Arc::new(RwLock::new(store::CellStore::new(
        valkey_con.clone(),
        config.cell_cache_size,
        config.default_capacity,
    )));

    let state = api::AppState {
        store: store.clone(),
        valkey: valkey_con.clone(),
        broadcast_tx: broadcast_tx.clone(),
    };

    tokio::spawn(consumer::run(valkey_con.clone(), store, broadcast_tx));

    let app = api::router(state).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("Server listening on {}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped.");
    Ok(())
}
