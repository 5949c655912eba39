//! App router: page generation, tasks, history, health, metrics
//!
//! `POST /api/pages` starts a background generation task and returns 202
//! with the task id; everything else is a read or a pause/resume toggle.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use genai_pool::CredentialPool;

use crate::history::History;
use crate::tasks::TaskStore;
use crate::workflow::PageGenerator;

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<PageGenerator>,
    pub tasks: Arc<TaskStore>,
    pub history: Arc<History>,
    pub pool: Arc<CredentialPool>,
    pub prometheus: PrometheusHandle,
}

/// Build the app router with a concurrency limit across all routes.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/api/pages", post(create_page))
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/pause", post(pause_task))
        .route("/api/tasks/{id}/resume", post(resume_task))
        .route("/api/history", get(list_history))
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> impl IntoResponse {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

#[derive(Deserialize)]
struct CreatePageRequest {
    keyword: String,
}

/// POST /api/pages — start a generation task for a keyword.
async fn create_page(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<CreatePageRequest>,
) -> impl IntoResponse {
    let keyword = body.keyword.trim().to_string();
    if keyword.is_empty() {
        return json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": "keyword must not be empty" }),
        );
    }

    let task = state.tasks.create(&keyword);
    info!(task_id = %task.id, keyword, "generation task accepted");

    let generator = state.generator.clone();
    let task_id = task.id;
    tokio::spawn(async move {
        generator.generate_page(task_id, keyword).await;
    });

    json_response(
        StatusCode::ACCEPTED,
        serde_json::json!({ "task_id": task.id, "status": task.status }),
    )
}

/// GET /api/tasks — all tasks, newest first.
async fn list_tasks(State(state): State<AppState>) -> impl IntoResponse {
    let tasks = state.tasks.list();
    json_response(StatusCode::OK, serde_json::json!({ "tasks": tasks }))
}

/// GET /api/tasks/{id}
async fn get_task(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.tasks.get(&id) {
        Some(task) => json_response(StatusCode::OK, serde_json::json!(task)),
        None => json_response(
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": "unknown task id" }),
        ),
    }
}

/// POST /api/tasks/{id}/pause
async fn pause_task(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    if state.tasks.pause(&id) {
        json_response(StatusCode::OK, serde_json::json!({ "status": "paused" }))
    } else {
        json_response(
            StatusCode::CONFLICT,
            serde_json::json!({ "error": "task not found or already finished" }),
        )
    }
}

/// POST /api/tasks/{id}/resume
async fn resume_task(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    if state.tasks.resume(&id) {
        json_response(StatusCode::OK, serde_json::json!({ "status": "running" }))
    } else {
        json_response(
            StatusCode::CONFLICT,
            serde_json::json!({ "error": "task not found or not paused" }),
        )
    }
}

/// GET /api/history — published pages, newest first.
async fn list_history(State(state): State<AppState>) -> impl IntoResponse {
    let entries = state.history.entries().await;
    json_response(StatusCode::OK, serde_json::json!({ "history": entries }))
}

/// GET /health — key pool summary. All keys usable → healthy, some →
/// degraded, none → unhealthy (503 so orchestration can alert).
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let total = state.pool.len();
    let available = state.pool.available_count().await;
    let quota_limited = state.pool.quota_limited_count().await;

    let (status, code) = if available == total && total > 0 {
        ("healthy", StatusCode::OK)
    } else if available > 0 {
        ("degraded", StatusCode::OK)
    } else {
        ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
    };

    json_response(
        code,
        serde_json::json!({
            "status": status,
            "keys_total": total,
            "keys_available": available,
            "keys_quota_limited": quota_limited,
        }),
    )
}

/// GET /metrics — Prometheus text exposition.
async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        state.prometheus.render(),
    )
}
