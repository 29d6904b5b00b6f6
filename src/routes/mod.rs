pub mod batches;
pub mod health;
pub mod providers;

use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/providers", get(providers::list_providers))
        .route("/api/batches", post(batches::create_batch))
        .route("/api/batches/status", get(batches::batch_status))
        .route("/api/batches/archive", get(batches::download_archive))
        .with_state(state)
}
