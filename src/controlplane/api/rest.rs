//! REST API Handlers
//!
//! Sync hook endpoints posted to by the orchestrator, plus health probes.

use crate::controlplane::hook::HookRequest;
use crate::controlplane::metrics::Metrics;
use crate::controlplane::reconcile::{
    sync, ClusterConfigReconciler, ClusterPlanReconciler, HookContext, PoolClusterReconciler,
    Reconciler, StorageSetReconciler,
};
use axum::{
    extract::{DefaultBodyLimit, Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::debug;

// =============================================================================
// Response Types
// =============================================================================

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// =============================================================================
// REST Router
// =============================================================================

/// Every hook this server answers, by name
pub fn default_reconcilers() -> Vec<Arc<dyn Reconciler>> {
    vec![
        Arc::new(ClusterConfigReconciler),
        Arc::new(ClusterPlanReconciler),
        Arc::new(StorageSetReconciler),
        Arc::new(PoolClusterReconciler),
    ]
}

/// REST API router builder
pub struct RestRouter {
    ctx: HookContext,
    metrics: Metrics,
    reconcilers: Vec<Arc<dyn Reconciler>>,
}

impl RestRouter {
    pub fn new(ctx: HookContext, metrics: Metrics) -> Self {
        Self {
            ctx,
            metrics,
            reconcilers: default_reconcilers(),
        }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let max_body_bytes = self.ctx.config.max_body_bytes;
        let reconcilers: BTreeMap<&'static str, Arc<dyn Reconciler>> = self
            .reconcilers
            .into_iter()
            .map(|r| (r.hook(), r))
            .collect();
        let state = AppState {
            ctx: self.ctx,
            metrics: self.metrics,
            reconcilers: Arc::new(reconcilers),
        };

        Router::new()
            // Hook endpoints
            .route("/v1/sync/:hook", post(sync_hook))
            // Health endpoints
            .route("/healthz", get(health_check))
            .route("/readyz", get(readiness_check))
            .layer(DefaultBodyLimit::max(max_body_bytes))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    ctx: HookContext,
    metrics: Metrics,
    reconcilers: Arc<BTreeMap<&'static str, Arc<dyn Reconciler>>>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Answer one sync call for `hook`
async fn sync_hook(
    State(state): State<AppState>,
    Path(hook): Path<String>,
    Json(request): Json<HookRequest>,
) -> Response {
    let Some(reconciler) = state.reconcilers.get(hook.as_str()) else {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiErrorResponse {
                error: "unknown_hook".into(),
                message: format!("No hook named {}", hook),
                details: Some(format!(
                    "known hooks: {}",
                    state.reconcilers.keys().copied().collect::<Vec<_>>().join(", ")
                )),
            }),
        )
            .into_response();
    };

    let started = Instant::now();
    let (response, outcome) = sync(reconciler.as_ref(), &request, &state.ctx).await;
    let elapsed = started.elapsed();
    state.metrics.observe(reconciler.hook(), outcome, elapsed);
    debug!(hook = reconciler.hook(), outcome = outcome.as_str(), ?elapsed, "answered hook");

    (StatusCode::OK, Json(response)).into_response()
}

/// Liveness probe
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.reconcilers.is_empty() {
        return (StatusCode::SERVICE_UNAVAILABLE, "no hooks registered");
    }
    (StatusCode::OK, "ok")
}
