use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use prompt_batch_generator::config::Config;
use prompt_batch_generator::llm::ProviderRegistry;
use prompt_batch_generator::pipeline::{BatchService, FsArtifactStore};
use prompt_batch_generator::telemetry::{HttpMakeSpan, HttpOnResponse, init_telemetry};
use prompt_batch_generator::{AppState, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    let telemetry_guard = init_telemetry(&config)?;

    tracing::info!(
        port = config.port,
        environment = %config.environment,
        "Starting prompt-batch-generator"
    );

    let registry = ProviderRegistry::new(config.provider_settings());
    let store = FsArtifactStore::new(&config.staging_dir, &config.archive_path);

    tracing::info!(
        staging_dir = %config.staging_dir.display(),
        archive_path = %config.archive_path.display(),
        pacing_ms = config.pacing_delay.as_millis() as u64,
        provider_timeout_secs = config.provider_timeout.as_secs(),
        "Batch service initialized"
    );

    let state = AppState {
        batches: Arc::new(BatchService::new(
            registry,
            Box::new(store),
            config.pacing_delay,
        )),
    };

    let app = routes::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(HttpMakeSpan)
                .on_response(HttpOnResponse),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    telemetry_guard.shutdown();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
