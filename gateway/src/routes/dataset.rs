//! Dataset upload and job status endpoints.

use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;

use crate::error::{ApiError, Result};
use crate::jobs::Job;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub job_id: String,
    pub total_items: usize,
}

/// POST /api/v1/dataset/upload - multipart: `file` (JSON array) plus an
/// optional `data_count` prefix limit. Returns the job id immediately.
async fn upload_dataset(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let mut file: Option<Vec<u8>> = None;
    let mut data_count: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::BadRequest("malformed multipart body".to_string()))?
    {
        match field.name() {
            Some("file") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| ApiError::BadRequest("failed to read file field".to_string()))?;
                file = Some(bytes.to_vec());
            }
            Some("data_count") => {
                let text = field.text().await.map_err(|_| {
                    ApiError::BadRequest("failed to read data_count field".to_string())
                })?;
                data_count = Some(text);
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| ApiError::BadDataset("missing file field".to_string()))?;
    let mut items: Vec<Value> = serde_json::from_slice(&file)
        .map_err(|_| ApiError::BadDataset("dataset must be a JSON array".to_string()))?;

    if let Some(raw) = data_count {
        let raw = raw.trim();
        if !raw.is_empty() {
            let count: usize = raw
                .parse()
                .ok()
                .filter(|&c| c > 0)
                .ok_or_else(|| {
                    ApiError::BadDataset("data_count must be a positive integer".to_string())
                })?;
            items.truncate(count);
        }
    }

    let total_items = items.len();
    let job_id = state.batch.submit(items).await;
    Ok(Json(UploadResponse { job_id, total_items }))
}

/// GET /api/v1/dataset/status/{job_id} - full job snapshot, results included.
async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>> {
    state
        .jobs
        .get(&job_id)
        .await
        .map(Json)
        .ok_or(ApiError::JobNotFound)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/dataset/upload", post(upload_dataset))
        .route("/dataset/status/{job_id}", get(job_status))
        .with_state(state)
}
