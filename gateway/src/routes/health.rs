//! Health and metrics exposition.

use std::sync::Arc;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    nodes_online: usize,
    nodes_total: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        nodes_online: state.registry.online_count(),
        nodes_total: state.registry.nodes().len(),
    })
}

/// Plain-text gauge exposition for scrapers.
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let mut body = String::from(
        "# HELP inferops_up Whether the gateway is up\n\
         # TYPE inferops_up gauge\n\
         inferops_up 1\n\
         # HELP inferops_node_online Whether a configured node is online\n\
         # TYPE inferops_node_online gauge\n",
    );
    for node in state.registry.snapshot() {
        body.push_str(&format!(
            "inferops_node_online{{node=\"{}\"}} {}\n",
            node.id,
            u8::from(node.online)
        ));
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}
