//! CStorClusterConfig hook
//!
//! Watches a cluster config with the cluster's nodes and its previous plan
//! attached, resolves the config's defaults and emits the cluster plan.

use super::{HookContext, Reconciled, Reconciler};
use crate::controlplane::hook::{to_attachment, HookRequest};
use crate::crd::{
    correlate, CStorClusterConfig, CStorClusterPlan, CStorClusterPlanSpec, PlannedNode,
    CLUSTER_CONFIG_UID_KEY,
};
use crate::error::{Error, Result};
use crate::planner::{eligible_nodes, resolve, select_nodes, NodeInventory};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::{info, instrument};

#[derive(Debug, Default)]
pub struct ClusterConfigReconciler;

#[async_trait]
impl Reconciler for ClusterConfigReconciler {
    fn hook(&self) -> &'static str {
        "clusterconfig"
    }

    #[instrument(skip_all, fields(hook = "clusterconfig"))]
    async fn reconcile(&self, request: &HookRequest, ctx: &HookContext) -> Result<Reconciled> {
        let config: CStorClusterConfig = request.watch_as()?;
        let config_uid = config
            .uid()
            .ok_or_else(|| Error::Validation("cluster config has no uid".into()))?;

        let nodes: Vec<Node> = request.attachments.decode()?;
        let eligible = eligible_nodes(&nodes, &config.spec.allowed_nodes)?;
        let inventory = NodeInventory {
            available: nodes.len(),
            eligible: eligible.len(),
        };
        let intent = resolve(&config.spec, inventory, &ctx.config.planner_defaults())?;

        let mut previous: Vec<CStorClusterPlan> = request
            .attachments
            .correlated(CLUSTER_CONFIG_UID_KEY, &config_uid)?;
        previous.sort_by_key(|plan| plan.name_any());
        let previous_nodes = previous
            .first()
            .map(|plan| plan.spec.nodes.clone())
            .unwrap_or_default();

        let selected = select_nodes(&eligible, &previous_nodes, &intent)?;
        info!(
            config = %config.name_any(),
            nodes = selected.len(),
            min = intent.min_pool_count,
            max = intent.max_pool_count,
            "planned nodes"
        );

        let plan = plan_for(&config, &config_uid, selected)?;
        Ok(Reconciled::Apply(vec![to_attachment(&plan)?]))
    }
}

/// Cluster plan owned by `config`, named after it
fn plan_for(
    config: &CStorClusterConfig,
    config_uid: &str,
    nodes: Vec<PlannedNode>,
) -> Result<CStorClusterPlan> {
    let owner = config.controller_owner_ref(&()).ok_or_else(|| {
        Error::Validation("cluster config has no name or uid for owner reference".into())
    })?;
    let name = config.name_any();

    let mut meta = ObjectMeta {
        name: Some(name.clone()),
        namespace: config.namespace(),
        owner_references: Some(vec![owner]),
        ..Default::default()
    };
    correlate(&mut meta, CLUSTER_CONFIG_UID_KEY, config_uid);

    let mut plan = CStorClusterPlan::new(&name, CStorClusterPlanSpec { nodes });
    plan.metadata = meta;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::config::OperatorConfig;
    use crate::controlplane::hook::Attachments;
    use crate::controlplane::reservation::InMemoryReservationLedger;
    use crate::crd::is_correlated;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn ctx() -> HookContext {
        HookContext::new(
            OperatorConfig::default(),
            Arc::new(InMemoryReservationLedger::new()),
        )
    }

    fn node(name: &str) -> Node {
        let mut node = Node::default();
        node.metadata.name = Some(name.into());
        node.metadata.uid = Some(format!("uid-{}", name));
        node
    }

    fn request(
        config: &CStorClusterConfig,
        nodes: &[Node],
        plans: &[CStorClusterPlan],
    ) -> HookRequest {
        let mut attachments = Attachments::default();
        for node in nodes {
            attachments.insert(node).unwrap();
        }
        for plan in plans {
            attachments.insert(plan).unwrap();
        }
        HookRequest {
            watch: to_attachment(config).unwrap(),
            attachments,
            finalizing: false,
        }
    }

    fn config() -> CStorClusterConfig {
        let mut config = CStorClusterConfig::new("cluster-a", Default::default());
        config.metadata.namespace = Some("openebs".into());
        config.metadata.uid = Some("config-uid".into());
        config
    }

    fn decode_plan(reconciled: Reconciled) -> CStorClusterPlan {
        match reconciled {
            Reconciled::Apply(attachments) => {
                assert_eq!(attachments.len(), 1);
                serde_json::from_value(attachments[0].clone()).unwrap()
            }
            other => panic!("expected a plan, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_plans_default_pool_count() {
        let nodes: Vec<Node> = ["n4", "n2", "n1", "n3"].into_iter().map(node).collect();
        let reconciled = ClusterConfigReconciler
            .reconcile(&request(&config(), &nodes, &[]), &ctx())
            .await
            .unwrap();

        let plan = decode_plan(reconciled);
        let names: Vec<&str> = plan.spec.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["n1", "n2", "n3"]);
        assert_eq!(plan.metadata.name.as_deref(), Some("cluster-a"));
        assert!(is_correlated(&plan.metadata, CLUSTER_CONFIG_UID_KEY, "config-uid"));
        assert_eq!(plan.owner_references()[0].uid, "config-uid");
    }

    #[tokio::test]
    async fn test_previous_plan_is_kept_stable() {
        let nodes: Vec<Node> = ["n1", "n2", "n3", "n4"].into_iter().map(node).collect();
        let mut previous = plan_for(
            &config(),
            "config-uid",
            vec![
                PlannedNode::new("n4", "uid-n4"),
                PlannedNode::new("n2", "uid-n2"),
                PlannedNode::new("n1", "uid-n1"),
            ],
        )
        .unwrap();
        previous.metadata.uid = Some("plan-uid".into());

        let reconciled = ClusterConfigReconciler
            .reconcile(&request(&config(), &nodes, &[previous]), &ctx())
            .await
            .unwrap();

        let plan = decode_plan(reconciled);
        let names: Vec<&str> = plan.spec.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["n4", "n2", "n1"]);
    }

    #[tokio::test]
    async fn test_invalid_intent_is_an_error() {
        let nodes: Vec<Node> = ["n1", "n2", "n3"].into_iter().map(node).collect();
        let mut config = config();
        config.spec.min_pool_count = Some(3);
        config.spec.max_pool_count = Some(2);

        let result = ClusterConfigReconciler
            .reconcile(&request(&config, &nodes, &[]), &ctx())
            .await;
        assert_matches!(result, Err(Error::Validation(_)));
    }
}
