use std::sync::Arc;
use std::time::Duration;

use drone_dispatch::api;
use drone_dispatch::config::Config;
use drone_dispatch::engine::handoff::run_handoff_sweeper;
use drone_dispatch::error::AppError;
use drone_dispatch::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let shared_state = Arc::new(AppState::new(config.engine.clone(), config.event_buffer_size));

    if config.handoff_sweep_interval_secs > 0 {
        tokio::spawn(run_handoff_sweeper(
            shared_state.engine.clone(),
            Duration::from_secs(config.handoff_sweep_interval_secs),
        ));
    } else {
        tracing::warn!("handoff sweeper disabled; pending handoffs are only retried on demand");
    }

    let app = api::rest::router(shared_state.clone());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
