mod app;
mod config;
mod error;
mod routes;
mod services;
mod state;

use tokio::signal;
use tracing_subscriber::EnvFilter;

use crate::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let state = AppState::from_env();

    match state.stall_store.clone() {
        Some(store) => {
            tracing::info!(
                url = %store.url,
                market_id = store.market_id.as_deref().unwrap_or("*"),
                "stall feed enabled"
            );
            tokio::spawn(services::stall_poller::run(state.clone(), store));
        }
        None => tracing::warn!("STALL_STORE_URL is not set; stall feed will stay empty"),
    }
    match state.map.map_id.as_deref() {
        Some(map_id) => tracing::info!(map_id, "map configured"),
        None => tracing::warn!("MAP_ID is not set; clients cannot bootstrap a map"),
    }
    if state.map.api_credentials.is_none() {
        tracing::warn!("MAP_API_KEY/MAP_API_SECRET are not set; map broker is disabled");
    }

    tokio::spawn(services::map_cache_evictor::run(state.clone()));

    let app = app::build_app(state);

    let addr = format!("0.0.0.0:{}", config::server_port());
    tracing::info!("Stall map server listening on {addr}");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "failed to bind TCP listener");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server failed");
    }

    tracing::info!("Server shut down gracefully");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
