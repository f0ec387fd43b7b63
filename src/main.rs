use anyhow::Result;
use axum::Router;
use std::io::ErrorKind;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;
#[cfg(test)]
mod test_support;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + ensure-bucket flag ---
    let (cfg, ensure_only) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting media-gateway with config: {:?}", cfg);

    // --- Initialize services ---
    let (state, store) = state::AppState::from_config(&cfg)?;

    // --- Bucket bootstrap ---
    services::bootstrap::ensure_bucket(store.as_ref()).await?;
    if ensure_only {
        tracing::info!("Bucket bootstrap complete.");
        return Ok(()); // exit after bootstrap
    }

    // --- Build router ---
    let app: Router = routes::routes::routes(&cfg).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
        // Keep serving rather than exiting on the spot.
        std::future::pending::<()>().await;
    }
}
