//! Node status and alert endpoints.

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use inferops_common::NodeMetrics;

use crate::alerts::{self, Alert};
use crate::cluster::registry::NodeSnapshot;
use crate::AppState;

/// One node as rendered to the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatusView {
    pub id: u32,
    pub name: String,
    pub online: bool,
    pub busy: bool,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_model: Option<String>,
    /// Seconds since the last successful telemetry fetch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<NodeMetrics>,
}

impl NodeStatusView {
    fn from_snapshot(snapshot: NodeSnapshot, now: Instant) -> Self {
        let last_seen_secs = snapshot
            .last_success_at
            .map(|t| now.duration_since(t).as_secs());
        let mut metrics = snapshot.metrics;
        if let Some(metrics) = metrics.as_mut() {
            // The UI reads the lock state off the metrics blob.
            metrics.locked = snapshot.busy;
        }
        Self {
            id: snapshot.id,
            name: snapshot.name,
            online: snapshot.online,
            busy: snapshot.busy,
            consecutive_failures: snapshot.consecutive_failures,
            cpu_model: snapshot.cpu_model,
            last_seen_secs,
            metrics,
        }
    }
}

/// GET /api/v1/status/all - every configured node with its latest state.
async fn status_all(State(state): State<Arc<AppState>>) -> Json<Vec<NodeStatusView>> {
    let now = Instant::now();
    let nodes = state
        .registry
        .snapshot()
        .into_iter()
        .map(|snapshot| NodeStatusView::from_snapshot(snapshot, now))
        .collect();
    Json(nodes)
}

/// GET /api/v1/alerts - alerts derived from the current cluster state.
async fn alerts(State(state): State<Arc<AppState>>) -> Json<Vec<Alert>> {
    let snapshot = state.registry.snapshot();
    Json(alerts::evaluate(
        &snapshot,
        &state.config.alerts,
        Instant::now(),
    ))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status/all", get(status_all))
        .route("/alerts", get(alerts))
        .with_state(state)
}
