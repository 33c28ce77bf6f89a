//! Chat completion endpoint.

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response, Sse};
use axum::{extract::State, routing::post, Json, Router};

use inferops_common::ChatCompletionRequest;

use crate::dispatch::sse_relay;
use crate::error::{ApiError, Result};
use crate::AppState;

static ASSIGNED_NODE_HEADER: HeaderName = HeaderName::from_static("x-assigned-node");
static ASSIGNED_NODE_NAME_HEADER: HeaderName = HeaderName::from_static("x-assigned-node-name");

/// POST /api/v1/chat/completions - proxy a chat completion to the best node.
///
/// Streaming responses open with a `node_assigned` SSE event before any
/// model output; non-streaming responses carry the assignment in headers.
async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response> {
    if request.messages.is_empty() {
        return Err(ApiError::BadRequest("messages must not be empty".to_string()));
    }

    if request.stream {
        let stream = state.dispatcher.open_stream(&request).await?;
        tracing::info!(
            node = stream.assigned().node_id,
            model = request.model.as_deref().unwrap_or("any"),
            "streaming chat dispatched"
        );
        return Ok(Sse::new(sse_relay(stream)).into_response());
    }

    let (assigned, body) = state.dispatcher.dispatch_buffered(&request).await?;
    tracing::info!(
        node = assigned.node_id,
        model = request.model.as_deref().unwrap_or("any"),
        "buffered chat dispatched"
    );

    let mut response = Json(body).into_response();
    if let Ok(value) = HeaderValue::from_str(&assigned.node_id.to_string()) {
        response
            .headers_mut()
            .insert(ASSIGNED_NODE_HEADER.clone(), value);
    }
    if let Ok(value) = HeaderValue::from_str(&assigned.node_name) {
        response
            .headers_mut()
            .insert(ASSIGNED_NODE_NAME_HEADER.clone(), value);
    }
    Ok(response)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/chat/completions", post(chat_completions))
        .with_state(state)
}
