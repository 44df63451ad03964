//! CStorClusterPlan hook, pool cluster stage
//!
//! Watches a cluster plan with its config, storage sets, block devices and
//! any existing pool cluster attached, and emits the pool cluster once every
//! node has its devices.

use super::cluster_plan::config_of;
use super::{HookContext, Reconciled, Reconciler};
use crate::controlplane::hook::{to_attachment, HookRequest};
use crate::crd::{
    BlockDevice, CStorClusterPlan, CStorClusterStorageSet, CStorPoolCluster, CLUSTER_PLAN_UID_KEY,
};
use crate::error::{Error, Result};
use crate::planner::{assemble, Assembly, AssemblyInput};
use async_trait::async_trait;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{info, instrument};

/// Condition type owned by this hook on the plan
pub const CONDITION_POOL_CLUSTER_ERROR: &str = "PoolClusterReconcileError";

#[derive(Debug, Default)]
pub struct PoolClusterReconciler;

#[async_trait]
impl Reconciler for PoolClusterReconciler {
    fn hook(&self) -> &'static str {
        "poolcluster"
    }

    fn condition_type(&self) -> &'static str {
        CONDITION_POOL_CLUSTER_ERROR
    }

    #[instrument(skip_all, fields(hook = "poolcluster"))]
    async fn reconcile(&self, request: &HookRequest, _ctx: &HookContext) -> Result<Reconciled> {
        let plan: CStorClusterPlan = request.watch_as()?;
        let plan_uid = plan
            .uid()
            .ok_or_else(|| Error::Validation("cluster plan has no uid".into()))?;

        let config = config_of(request, &plan)?;
        let storage_sets: Vec<CStorClusterStorageSet> = request
            .attachments
            .correlated(CLUSTER_PLAN_UID_KEY, &plan_uid)?;
        let mut observed: Vec<CStorPoolCluster> = request
            .attachments
            .correlated(CLUSTER_PLAN_UID_KEY, &plan_uid)?;
        observed.sort_by_key(|cspc| cspc.name_any());

        let devices: Vec<BlockDevice> = request.attachments.decode()?;
        let reserved = reserved_by_storage_set(&devices, &storage_sets);

        let assembly = assemble(&AssemblyInput {
            plan: &plan,
            config: Some(&config),
            storage_sets: &storage_sets,
            reserved: &reserved,
            observed: observed.first(),
        })?;

        match assembly {
            Assembly::Ready(cspc) => {
                info!(
                    plan = %plan.name_any(),
                    pools = cspc.spec.pools.len(),
                    "assembled pool cluster"
                );
                Ok(Reconciled::Apply(vec![to_attachment(&cspc)?]))
            }
            Assembly::NotReady { reason } => Ok(Reconciled::NotReady(reason)),
        }
    }
}

/// Active devices each storage set holds on its current node, in name
/// order and keyed by storage set UID.
///
/// A retargeted storage set still holds its old node's devices until the
/// storage set hook releases them; those never count towards its new node.
fn reserved_by_storage_set(
    devices: &[BlockDevice],
    storage_sets: &[CStorClusterStorageSet],
) -> BTreeMap<String, Vec<String>> {
    let mut reserved: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for storage_set in storage_sets {
        let Some(uid) = storage_set.uid() else {
            continue;
        };
        let mut names: Vec<String> = devices
            .iter()
            .filter(|d| d.is_active() && d.reservation_owner() == Some(uid))
            .filter(|d| d.host_label() == Some(storage_set.node_name()))
            .map(|d| d.name().to_string())
            .collect();
        names.sort();
        reserved.insert(uid.to_string(), names);
    }
    reserved
}
