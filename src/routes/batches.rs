use axum::{
    Json,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};

use crate::AppState;
use crate::error::AppResult;
use crate::pipeline::{BatchRequest, BatchStatus, BatchSummary};

pub const ARCHIVE_FILE_NAME: &str = "prompts.zip";

pub async fn create_batch(
    State(state): State<AppState>,
    Json(body): Json<BatchRequest>,
) -> AppResult<Json<BatchSummary>> {
    tracing::info!(
        provider = %body.provider_id,
        items = body.work_item_names.len(),
        "batch requested"
    );

    let report = state.batches.clone().submit(body).await?;

    Ok(Json(BatchSummary::from(&report)))
}

pub async fn batch_status(State(state): State<AppState>) -> Json<BatchStatus> {
    Json(state.batches.status())
}

pub async fn download_archive(State(state): State<AppState>) -> AppResult<Response> {
    let bytes = state.batches.archive().await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{ARCHIVE_FILE_NAME}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
