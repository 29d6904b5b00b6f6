use axum::{Json, extract::State};

use crate::AppState;
use crate::llm::registry::ProviderInfo;

pub async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderInfo>> {
    Json(state.batches.registry().providers())
}
