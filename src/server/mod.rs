//! HTTP surface: health, reaction intake, and pending views.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::notify::Notifier;
use crate::tracker::lifecycle::{LifecycleStore, PendingEntry};
use crate::tracker::model::{ChannelId, NotificationId};
use crate::tracker::reconcile::ReconciliationEngine;
use crate::tracker::render::Renderer;
use crate::tracker::router::{SubscriptionRouter, SubsystemFilter};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<LifecycleStore>,
    pub router: Arc<SubscriptionRouter>,
    pub engine: Arc<ReconciliationEngine>,
    pub notifier: Arc<dyn Notifier>,
    pub renderer: Renderer,
}

/// Build the Axum router.
pub fn tracker_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/reactions", post(handle_reaction))
        .route("/api/pending", get(list_pending))
        .route("/api/channels/{channel_id}/pending", post(post_pending_digest))
        .with_state(state)
}

/// Snowflakes arrive as JSON numbers or strings depending on the client.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Snowflake {
    Number(u64),
    Text(String),
}

impl Snowflake {
    fn value(&self) -> Option<u64> {
        match self {
            Snowflake::Number(n) => Some(*n),
            Snowflake::Text(s) => s.trim().parse().ok(),
        }
    }
}

fn bad_request(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

async fn pending_for(
    state: &AppState,
    channel: Option<ChannelId>,
) -> Result<Vec<PendingEntry>, crate::error::TrackerError> {
    let filter = channel
        .map(|c| state.router.view_filter(c))
        .unwrap_or_else(SubsystemFilter::wildcard);
    state
        .lifecycle
        .list_pending(|tag| state.router.accepts(&filter, tag), Utc::now())
        .await
}

// ── Health ──────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "folklore"
    }))
}

// ── Reactions ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ReactionRequest {
    channel_id: Snowflake,
    notification_id: Snowflake,
}

async fn handle_reaction(
    State(state): State<AppState>,
    Json(body): Json<ReactionRequest>,
) -> impl IntoResponse {
    let (Some(channel), Some(notification)) = (body.channel_id.value(), body.notification_id.value())
    else {
        return bad_request("channel_id and notification_id must be snowflakes");
    };
    let (channel, notification) = (ChannelId(channel), NotificationId(notification));
    info!(%channel, %notification, "Reconciliation requested");

    match state.engine.handle_reaction(channel, notification).await {
        Ok(outcome) => (StatusCode::OK, Json(json!(outcome))),
        Err(e) => {
            warn!(%channel, %notification, "Reconciliation failed: {e}");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "outcome": "failed", "error": e.to_string() })),
            )
        }
    }
}

// ── Pending ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PendingQuery {
    channel_id: Option<String>,
}

async fn list_pending(
    State(state): State<AppState>,
    Query(query): Query<PendingQuery>,
) -> impl IntoResponse {
    let channel = match query.channel_id.as_deref().map(str::parse::<ChannelId>) {
        None => None,
        Some(Ok(c)) => Some(c),
        Some(Err(_)) => return bad_request("Invalid channel_id"),
    };

    match pending_for(&state, channel).await {
        Ok(entries) => (
            StatusCode::OK,
            Json(json!({ "count": entries.len(), "entries": entries })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn post_pending_digest(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> impl IntoResponse {
    let Ok(channel) = channel_id.parse::<ChannelId>() else {
        return bad_request("Invalid channel_id");
    };

    let entries = match pending_for(&state, Some(channel)).await {
        Ok(entries) => entries,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            );
        }
    };

    let digest = state.renderer.pending_digest(&entries);
    match state.notifier.post(channel, &digest).await {
        Ok(id) => (
            StatusCode::OK,
            Json(json!({ "notification_id": id.to_string(), "count": entries.len() })),
        ),
        Err(e) => {
            warn!(%channel, "Failed to post pending digest: {e}");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}
