//! Admin API for key-pool management
//!
//! Runs on a separate listener port (default 9090) so the pool's state can
//! be inspected and reset without exposing these operations on the app
//! port. Keys are addressed by pool index; raw key material never appears
//! in any response — masked forms only.
//!
//! Endpoints:
//! - GET    /admin/keys                — per-key status with queue depth
//! - GET    /admin/pool                — pool summary counts
//! - POST   /admin/keys/clear-quota    — clear all quota limits
//! - POST   /admin/keys/clear-failures — clear all temporary failures
//! - POST   /admin/keys/clear          — clear both
//! - DELETE /admin/queues/{index}      — drop one key's waiting tickets
//! - DELETE /admin/queues              — drop all waiting tickets

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use tracing::info;

use genai_pool::{CallSerializer, CredentialPool, ThroughputLimiter};

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    pool: Arc<CredentialPool>,
    limiter: Arc<ThroughputLimiter>,
    serializer: Arc<CallSerializer>,
}

impl AdminState {
    pub fn new(
        pool: Arc<CredentialPool>,
        limiter: Arc<ThroughputLimiter>,
        serializer: Arc<CallSerializer>,
    ) -> Self {
        Self {
            pool,
            limiter,
            serializer,
        }
    }
}

/// Build the admin axum router with all key management endpoints.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/keys", get(list_keys))
        .route("/admin/pool", get(pool_summary))
        .route("/admin/keys/clear-quota", post(clear_quota))
        .route("/admin/keys/clear-failures", post(clear_failures))
        .route("/admin/keys/clear", post(clear_all))
        .route("/admin/queues/{index}", delete(clear_queue))
        .route("/admin/queues", delete(clear_all_queues))
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> impl IntoResponse {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// GET /admin/keys — masked per-key status, usage counters, queue depth.
async fn list_keys(State(state): State<AdminState>) -> impl IntoResponse {
    let mut keys = Vec::new();
    for status in state.pool.statuses().await {
        let key = state.pool.key_at(status.index);
        let (queue_depth, stats) = match key {
            Some(k) => (
                state.serializer.queue_depth(k).await,
                Some(state.limiter.stats(k).await),
            ),
            None => (0, None),
        };
        keys.push(serde_json::json!({
            "index": status.index,
            "key": status.masked,
            "priority": status.is_priority,
            "state": status.state,
            "detail": status.detail,
            "queue_depth": queue_depth,
            "minute_count": stats.map(|s| s.minute_count),
            "hour_count": stats.map(|s| s.hour_count),
        }));
    }
    json_response(StatusCode::OK, serde_json::json!({ "keys": keys }))
}

/// GET /admin/pool — summary counts, same shape as the health endpoint plus
/// queue totals.
async fn pool_summary(State(state): State<AdminState>) -> impl IntoResponse {
    let total = state.pool.len();
    let available = state.pool.available_count().await;
    let quota_limited = state.pool.quota_limited_count().await;
    let status = if available == total && total > 0 {
        "healthy"
    } else if available > 0 {
        "degraded"
    } else {
        "unhealthy"
    };
    json_response(
        StatusCode::OK,
        serde_json::json!({
            "status": status,
            "keys_total": total,
            "keys_available": available,
            "keys_quota_limited": quota_limited,
            "keys_failed": total - available - quota_limited,
            "queued_calls": state.serializer.total_queue_depth().await,
        }),
    )
}

/// POST /admin/keys/clear-quota
async fn clear_quota(State(state): State<AdminState>) -> impl IntoResponse {
    let cleared = state.pool.clear_all_quota_limits().await;
    info!(cleared, "admin cleared quota limits");
    json_response(StatusCode::OK, serde_json::json!({ "cleared": cleared }))
}

/// POST /admin/keys/clear-failures
async fn clear_failures(State(state): State<AdminState>) -> impl IntoResponse {
    let cleared = state.pool.clear_all_temporary_failures().await;
    info!(cleared, "admin cleared temporary failures");
    json_response(StatusCode::OK, serde_json::json!({ "cleared": cleared }))
}

/// POST /admin/keys/clear — quota limits and temporary failures together.
async fn clear_all(State(state): State<AdminState>) -> impl IntoResponse {
    let cleared = state.pool.clear_all().await;
    info!(cleared, "admin cleared all recoverable key state");
    json_response(StatusCode::OK, serde_json::json!({ "cleared": cleared }))
}

/// DELETE /admin/queues/{index} — drop one key's waiting tickets.
async fn clear_queue(
    State(state): State<AdminState>,
    Path(index): Path<usize>,
) -> impl IntoResponse {
    match state.pool.key_at(index) {
        Some(key) => {
            let dropped = state.serializer.clear(key).await;
            info!(index, dropped, "admin cleared key queue");
            json_response(StatusCode::OK, serde_json::json!({ "dropped": dropped }))
        }
        None => json_response(
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": format!("no key at index {index}") }),
        ),
    }
}

/// DELETE /admin/queues — drop all waiting tickets across keys.
async fn clear_all_queues(State(state): State<AdminState>) -> impl IntoResponse {
    let dropped = state.serializer.clear_all().await;
    info!(dropped, "admin cleared all queues");
    json_response(StatusCode::OK, serde_json::json!({ "dropped": dropped }))
}
