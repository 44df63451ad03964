//! CStorClusterPlan hook, storage set stage
//!
//! Watches a cluster plan with its config and storage sets attached and
//! emits one storage set per planned node.

use super::{HookContext, Reconciled, Reconciler};
use crate::controlplane::hook::{to_attachment, HookRequest};
use crate::crd::{
    correlation_uid, CStorClusterConfig, CStorClusterPlan, CStorClusterStorageSet, DiskRequest,
    CLUSTER_CONFIG_UID_KEY, CLUSTER_PLAN_UID_KEY,
};
use crate::error::{Error, Result};
use crate::planner::{resolve, NodeInventory, StorageSetPlanner};
use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use tracing::{debug, instrument};

#[derive(Debug, Default)]
pub struct ClusterPlanReconciler;

/// The config a plan was derived from, found through the plan's correlation
pub(crate) fn config_of(
    request: &HookRequest,
    plan: &CStorClusterPlan,
) -> Result<CStorClusterConfig> {
    let missing = || Error::MissingAttachment {
        kind: "CStorClusterConfig".into(),
    };
    let config_uid = correlation_uid(plan.meta(), CLUSTER_CONFIG_UID_KEY).ok_or_else(missing)?;

    request
        .attachments
        .decode::<CStorClusterConfig>()?
        .into_iter()
        .find(|config| config.uid().as_deref() == Some(config_uid))
        .ok_or_else(missing)
}

#[async_trait]
impl Reconciler for ClusterPlanReconciler {
    fn hook(&self) -> &'static str {
        "clusterplan"
    }

    #[instrument(skip_all, fields(hook = "clusterplan"))]
    async fn reconcile(&self, request: &HookRequest, ctx: &HookContext) -> Result<Reconciled> {
        let plan: CStorClusterPlan = request.watch_as()?;
        let plan_uid = plan
            .uid()
            .ok_or_else(|| Error::Validation("cluster plan has no uid".into()))?;

        let observed: Vec<CStorClusterStorageSet> = request
            .attachments
            .correlated(CLUSTER_PLAN_UID_KEY, &plan_uid)?;
        if plan.spec.nodes.is_empty() {
            debug!(plan = %plan.name_any(), "plan has no nodes, no storage sets");
            return Ok(Reconciled::Apply(Vec::new()));
        }

        let config = config_of(request, &plan)?;
        let planned = plan.spec.nodes.len();
        let intent = resolve(
            &config.spec,
            NodeInventory {
                available: planned,
                eligible: planned,
            },
            &ctx.config.planner_defaults(),
        )?;
        let disk = DiskRequest {
            capacity: intent.min_disk_capacity.clone(),
            count: intent.min_disk_count as i64,
        };

        let planner = StorageSetPlanner::new(&plan, &observed, disk, intent.external_provision)?;
        let storage_sets = planner.plan();
        debug!(
            plan = %plan.name_any(),
            observed = observed.len(),
            desired = storage_sets.len(),
            "planned storage sets"
        );

        let attachments = storage_sets
            .iter()
            .map(to_attachment)
            .collect::<Result<Vec<_>>>()?;
        Ok(Reconciled::Apply(attachments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::config::OperatorConfig;
    use crate::controlplane::hook::Attachments;
    use crate::controlplane::reservation::InMemoryReservationLedger;
    use crate::crd::{correlate, CStorClusterPlanSpec, PlannedNode};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn ctx() -> HookContext {
        HookContext::new(
            OperatorConfig::default(),
            Arc::new(InMemoryReservationLedger::new()),
        )
    }

    fn config() -> CStorClusterConfig {
        let mut config = CStorClusterConfig::new("cluster-a", Default::default());
        config.metadata.uid = Some("config-uid".into());
        config.spec.pool_config.raid_type = Some("raidz".into());
        config
    }

    fn plan(nodes: &[(&str, &str)]) -> CStorClusterPlan {
        let mut plan = CStorClusterPlan::new(
            "cluster-a",
            CStorClusterPlanSpec {
                nodes: nodes.iter().map(|(n, u)| PlannedNode::new(*n, *u)).collect(),
            },
        );
        plan.metadata.uid = Some("plan-uid".into());
        correlate(&mut plan.metadata, CLUSTER_CONFIG_UID_KEY, "config-uid");
        plan
    }

    fn request(plan: &CStorClusterPlan, config: Option<&CStorClusterConfig>) -> HookRequest {
        let mut attachments = Attachments::default();
        if let Some(config) = config {
            attachments.insert(config).unwrap();
        }
        HookRequest {
            watch: to_attachment(plan).unwrap(),
            attachments,
            finalizing: false,
        }
    }

    #[tokio::test]
    async fn test_one_storage_set_per_node_with_resolved_disks() {
        let plan = plan(&[("n1", "u1"), ("n2", "u2")]);
        let reconciled = ClusterPlanReconciler
            .reconcile(&request(&plan, Some(&config())), &ctx())
            .await
            .unwrap();

        let Reconciled::Apply(attachments) = reconciled else {
            panic!("expected storage sets");
        };
        let sets: Vec<CStorClusterStorageSet> = attachments
            .into_iter()
            .map(|raw| serde_json::from_value(raw).unwrap())
            .collect();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].metadata.name.as_deref(), Some("cluster-a-u1"));
        assert_eq!(sets[0].spec.disk.count, 3);
        assert_eq!(sets[0].spec.disk.capacity, "100Gi");
    }

    #[tokio::test]
    async fn test_missing_config_is_reported_as_missing() {
        let plan = plan(&[("n1", "u1")]);
        let result = ClusterPlanReconciler
            .reconcile(&request(&plan, None), &ctx())
            .await;
        assert_matches!(result, Err(Error::MissingAttachment { .. }));
    }

    #[tokio::test]
    async fn test_foreign_config_is_ignored() {
        let plan = plan(&[("n1", "u1")]);
        let mut other = config();
        other.metadata.uid = Some("someone-else".into());
        let result = ClusterPlanReconciler
            .reconcile(&request(&plan, Some(&other)), &ctx())
            .await;
        assert_matches!(result, Err(Error::MissingAttachment { .. }));
    }
}
