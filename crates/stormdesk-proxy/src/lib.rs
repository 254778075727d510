//! HTTP front door for a stormdesk chat session.
//!
//! One long-lived [`ChatSession`] sits behind `POST /prompt`. The session slot
//! starts empty and is filled at most once by a background connect task; until
//! it lands, the endpoint answers 503.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use stormdesk_client::ChatSession;

/// The session slot shared between the prompt handler and the init task.
pub type SharedSession = Arc<RwLock<Option<ChatSession>>>;

/// An empty slot, ready to be handed to [`app`] and filled by the init task.
pub fn session_slot() -> SharedSession {
    Arc::new(RwLock::new(None))
}

#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
}

#[derive(Debug, Serialize)]
struct PromptReply {
    response: String,
}

#[derive(Debug, Serialize)]
struct ErrorReply {
    error: String,
}

fn error_reply(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorReply { error: error.into() })).into_response()
}

/// Builds the proxy router over a (possibly still empty) session slot.
pub fn app(sessions: SharedSession) -> Router {
    Router::new()
        .route("/prompt", post(prompt))
        .layer(TraceLayer::new_for_http())
        .with_state(sessions)
}

async fn prompt(
    State(sessions): State<SharedSession>,
    Json(request): Json<PromptRequest>,
) -> Response {
    // The write lock is held across the whole exchange: one query in flight
    // at a time, matching the single chat loop this replaces.
    let slot = sessions.write().await;
    let Some(session) = slot.as_ref() else {
        tracing::warn!("prompt arrived before the chat session was ready");
        return error_reply(StatusCode::SERVICE_UNAVAILABLE, "MCP client not ready yet");
    };

    tracing::info!(prompt = %request.prompt, "processing prompt");
    match session.process_query(&request.prompt).await {
        Ok(response) => {
            tracing::info!("prompt answered");
            (StatusCode::OK, Json(PromptReply { response })).into_response()
        }
        Err(error) => {
            tracing::error!(%error, "query failed");
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    }
}
