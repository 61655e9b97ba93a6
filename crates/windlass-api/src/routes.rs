// Route handlers: health, readiness, status, metrics, JSON projections.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use windlass_engine::{RuntimeStatus, RuntimeWorkflowInfo};
use windlass_storage::{ExecutionRow, WorkflowStats};

use crate::dashboard::DASHBOARD_HTML;
use crate::ApiState;

pub fn routes(state: ApiState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .route("/api/workflows/active", get(active_workflows))
        .route("/api/workflows/history", get(history))
        .route("/api/workflows/stats", get(stats))
        .route("/api/workflows/failures", get(failures))
        .with_state(state)
}

async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
}

/// GET /health - 200 whenever the agent process is alive
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
    })
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    workflows: usize,
}

/// GET /ready - 200 once the initial scan finished, even with zero
/// workflows loaded
async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    if state.agent.is_ready() {
        (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                workflows: state.registry.len(),
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "loading",
                workflows: 0,
            }),
        )
    }
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    version: &'static str,
    started_at: DateTime<Utc>,
    uptime_seconds: f64,
    workflows: WorkflowCounts,
    executions: ExecutionCounts,
    details: Vec<RuntimeWorkflowInfo>,
}

#[derive(Serialize)]
struct WorkflowCounts {
    total: usize,
    active: usize,
    stopped: usize,
    error: usize,
}

#[derive(Serialize)]
struct ExecutionCounts {
    total: u64,
    succeeded: u64,
    failed: u64,
}

/// GET /status - aggregated runtime projection
async fn status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let details = state.registry.snapshot();
    let mut workflows = WorkflowCounts {
        total: details.len(),
        active: 0,
        stopped: 0,
        error: 0,
    };
    let mut executions = ExecutionCounts {
        total: 0,
        succeeded: 0,
        failed: 0,
    };
    for info in &details {
        match info.status {
            RuntimeStatus::Active => workflows.active += 1,
            RuntimeStatus::Stopped => workflows.stopped += 1,
            RuntimeStatus::Error => workflows.error += 1,
        }
        executions.total += info.total_executions;
        executions.succeeded += info.succeeded;
        executions.failed += info.failed;
    }

    Json(StatusResponse {
        status: "running",
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at,
        uptime_seconds: state.uptime_seconds(),
        workflows,
        executions,
        details,
    })
}

/// GET /metrics - Prometheus text exposition
async fn metrics(State(state): State<ApiState>) -> impl IntoResponse {
    state.metrics.set_uptime_seconds(state.uptime_seconds());
    match state.metrics.export() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("metrics export failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /api/workflows/active - registry snapshot
async fn active_workflows(State(state): State<ApiState>) -> Json<Vec<RuntimeWorkflowInfo>> {
    Json(state.registry.snapshot())
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    workflow: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /api/workflows/history - recent executions, running rows included
async fn history(
    State(state): State<ApiState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<ExecutionRow>>, StatusCode> {
    let rows = state
        .store
        .recent_executions(params.workflow.as_deref(), params.limit.clamp(1, 1000))
        .await
        .map_err(|e| {
            tracing::error!("failed to query history: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
struct StatsParams {
    workflow: String,
    #[serde(default = "default_days")]
    days: i64,
}

fn default_days() -> i64 {
    7
}

/// GET /api/workflows/stats?workflow=<name> - aggregate statistics
async fn stats(
    State(state): State<ApiState>,
    Query(params): Query<StatsParams>,
) -> Result<Json<WorkflowStats>, StatusCode> {
    let since = Utc::now() - ChronoDuration::days(params.days.clamp(1, 365));
    let stats = state
        .store
        .stats(&params.workflow, since)
        .await
        .map_err(|e| {
            tracing::error!("failed to query stats: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
struct FailuresParams {
    #[serde(default = "default_hours")]
    hours: i64,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_hours() -> i64 {
    24
}

/// GET /api/workflows/failures - failed executions in the window
async fn failures(
    State(state): State<ApiState>,
    Query(params): Query<FailuresParams>,
) -> Result<Json<Vec<ExecutionRow>>, StatusCode> {
    let since = Utc::now() - ChronoDuration::hours(params.hours.clamp(1, 24 * 365));
    let rows = state
        .store
        .failed_since(since, params.limit.clamp(1, 1000))
        .await
        .map_err(|e| {
            tracing::error!("failed to query failures: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(rows))
}
