//! Public HTTP facade.
//!
//! Thin adapters between HTTP and the core: validation and serialization
//! only, no business logic.

pub mod chat;
pub mod dataset;
pub mod health;
pub mod models;
pub mod status;

use std::sync::Arc;

use axum::Router;

use crate::AppState;

/// Assemble the full application router.
pub fn app_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .merge(status::router(state.clone()))
        .merge(models::router(state.clone()))
        .merge(chat::router(state.clone()))
        .merge(dataset::router(state.clone()));

    Router::new()
        .nest("/api/v1", api)
        .merge(health::router(state))
}
