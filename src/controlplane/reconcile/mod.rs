//! Reconcilers
//!
//! One reconciler per hook. A reconciler decodes the request into typed
//! resources, runs the planning core and hands back the attachments to
//! converge on. [`sync`] wraps every reconciler with the shared policy:
//! finalizing, readiness retries, error classification and status writes.

pub mod cluster_config;
pub mod cluster_plan;
pub mod pool_cluster;
pub mod storage_set;

pub use cluster_config::ClusterConfigReconciler;
pub use cluster_plan::ClusterPlanReconciler;
pub use pool_cluster::PoolClusterReconciler;
pub use storage_set::StorageSetReconciler;

use crate::controlplane::config::OperatorConfig;
use crate::controlplane::hook::{error_status, resolved_status, HookRequest, HookResponse};
use crate::controlplane::metrics::Outcome;
use crate::crd::CONDITION_RECONCILE_ERROR;
use crate::domain::ports::ReservationLedger;
use crate::error::{ErrorAction, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared, read only state handed to every reconciler
#[derive(Clone)]
pub struct HookContext {
    pub config: OperatorConfig,
    pub ledger: Arc<dyn ReservationLedger>,
}

impl HookContext {
    pub fn new(config: OperatorConfig, ledger: Arc<dyn ReservationLedger>) -> Self {
        Self { config, ledger }
    }
}

/// Result of a successful reconciliation
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    /// Converge on these attachments
    Apply(Vec<Value>),
    /// Inputs are incomplete; change nothing and look again shortly
    NotReady(String),
}

/// A hook handler
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Hook name used in routes, logs and metrics
    fn hook(&self) -> &'static str;

    /// Condition type this hook owns on the watched resource
    fn condition_type(&self) -> &'static str {
        CONDITION_RECONCILE_ERROR
    }

    async fn reconcile(&self, request: &HookRequest, ctx: &HookContext) -> Result<Reconciled>;

    /// Clean up state kept outside the orchestrator when the watched
    /// resource goes away. Returns the attachments to converge on while
    /// finalizing, which are usually none.
    async fn finalize(&self, _request: &HookRequest, _ctx: &HookContext) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }
}

/// Run `reconciler` and turn whatever it returns into a hook response.
///
/// Never fails: every error becomes a skipped round.
pub async fn sync(
    reconciler: &dyn Reconciler,
    request: &HookRequest,
    ctx: &HookContext,
) -> (HookResponse, Outcome) {
    let hook = reconciler.hook();

    if request.finalizing {
        let attachments = match reconciler.finalize(request, ctx).await {
            Ok(attachments) => attachments,
            Err(e) => {
                warn!(hook, error = %e, "finalize failed, releasing children anyway");
                Vec::new()
            }
        };
        debug!(hook, attachments = attachments.len(), "finalizing");
        return (HookResponse::apply(attachments), Outcome::Finalized);
    }

    match reconciler.reconcile(request, ctx).await {
        Ok(Reconciled::Apply(attachments)) => {
            debug!(hook, attachments = attachments.len(), "reconciled");
            let status = resolved_status(request, reconciler.condition_type());
            (
                HookResponse::apply(attachments).with_status(status),
                Outcome::Applied,
            )
        }
        Ok(Reconciled::NotReady(reason)) => {
            info!(hook, reason = %reason, "not ready, checking again later");
            (
                HookResponse::retry_after(ctx.config.resync_after_seconds),
                Outcome::NotReady,
            )
        }
        Err(e) => match e.action() {
            ErrorAction::ReportAndSkip => {
                warn!(hook, error = %e, reason = e.reason(), "reconcile failed");
                let status = error_status(request, reconciler.condition_type(), &e);
                (HookResponse::skip().with_status(status), Outcome::Failed)
            }
            ErrorAction::SkipSilently => {
                info!(hook, error = %e, "dependency not observed yet, skipping");
                (HookResponse::skip(), Outcome::Skipped)
            }
            ErrorAction::Resync => {
                let delay = ctx.config.resync_after_seconds;
                warn!(hook, error = %e, retry_in_secs = delay, "reconcile lost a race, resyncing");
                (HookResponse::retry_after(delay), Outcome::Failed)
            }
            ErrorAction::RetryAfter(delay) => {
                warn!(hook, error = %e, retry_in = ?delay, "reconcile failed, retrying");
                (HookResponse::retry_after(delay.as_secs()), Outcome::Failed)
            }
        },
    }
}
