//! Model discovery endpoint.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};

use crate::AppState;

/// GET /api/v1/models - union of models advertised by online nodes.
async fn list_models(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    let models: BTreeSet<String> = state
        .registry
        .snapshot()
        .into_iter()
        .filter(|node| node.online)
        .filter_map(|node| node.metrics)
        .flat_map(|metrics| metrics.models)
        .collect();
    Json(models.into_iter().collect())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/models", get(list_models))
        .with_state(state)
}
