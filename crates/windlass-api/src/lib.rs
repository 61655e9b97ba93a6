// Read-only HTTP surface for the agent
//
// Everything here is a projection of runtime state owned elsewhere: the
// registry and metrics live in the engine, history lives in the store.
// No endpoint mutates anything and none are authenticated.

mod dashboard;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::Router;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use windlass_engine::{Agent, Metrics, WorkflowRegistry};
use windlass_storage::HistoryStore;

/// App state shared across routes
#[derive(Clone)]
pub struct ApiState {
    pub agent: Agent,
    pub registry: Arc<WorkflowRegistry>,
    pub store: HistoryStore,
    pub metrics: Arc<Metrics>,
    pub started_at: DateTime<Utc>,
    started_instant: Instant,
}

impl ApiState {
    pub fn new(
        agent: Agent,
        registry: Arc<WorkflowRegistry>,
        store: HistoryStore,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            agent,
            registry,
            store,
            metrics,
            started_at: Utc::now(),
            started_instant: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started_instant.elapsed().as_secs_f64()
    }
}

/// Build the full router.
pub fn router(state: ApiState) -> Router {
    routes::routes(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until the token cancels. A bind failure is
/// startup-critical and propagates.
pub async fn serve(state: ApiState, port: u16, cancel: CancellationToken) -> anyhow::Result<()> {
    let app = router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind http port {port}"))?;
    tracing::info!(%addr, "http surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("http server error")?;

    tracing::info!("http surface stopped");
    Ok(())
}
