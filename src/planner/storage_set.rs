//! Node/StorageSet Planner
//!
//! Maps the nodes of a cluster plan onto storage sets. Every node UID falls
//! into one of three buckets:
//!
//! - `Noop`: planned and already backed by a storage set
//! - `Create`: planned, no storage set yet
//! - `Remove`: backed by a storage set, no longer planned
//!
//! Removals are then paired with creations, both sorted by UID, into
//! `Update`s: the existing storage set is retargeted at the new node instead
//! of being deleted and recreated. Leftover removals are expressed by leaving
//! the storage set out of the planned list.

use crate::crd::{
    correlate, CStorClusterPlan, CStorClusterStorageSet, CStorClusterStorageSetSpec, DiskRequest,
    ExternalProvision, PlannedNode, CLUSTER_PLAN_UID_KEY,
};
use crate::error::{Error, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

// =============================================================================
// Buckets
// =============================================================================

/// What happens to a storage set this round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeAction {
    Noop { node: PlannedNode },
    Create { node: PlannedNode },
    /// Existing storage set of `from_uid` now serves `to`
    Update { from_uid: String, to: PlannedNode },
    Remove { node_uid: String },
}

/// Buckets after pairing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanBuckets {
    pub noop: Vec<String>,
    pub create: Vec<String>,
    pub remove: Vec<String>,
    /// (removed uid, created uid)
    pub update: Vec<(String, String)>,
}

// =============================================================================
// Planner
// =============================================================================

/// Per call planner; holds only the inputs of one reconciliation
pub struct StorageSetPlanner<'a> {
    plan_name: String,
    plan_uid: String,
    namespace: Option<String>,
    owner: OwnerReference,
    desired: BTreeMap<&'a str, &'a PlannedNode>,
    observed: BTreeMap<&'a str, &'a CStorClusterStorageSet>,
    disk: DiskRequest,
    external: Option<ExternalProvision>,
}

impl<'a> StorageSetPlanner<'a> {
    pub fn new(
        plan: &'a CStorClusterPlan,
        observed: &'a [CStorClusterStorageSet],
        disk: DiskRequest,
        external: Option<ExternalProvision>,
    ) -> Result<Self> {
        let plan_uid = plan
            .uid()
            .ok_or_else(|| Error::Validation("cluster plan has no uid".into()))?;
        let owner = plan.controller_owner_ref(&()).ok_or_else(|| {
            Error::Validation("cluster plan has no name or uid for owner reference".into())
        })?;

        let desired = plan
            .spec
            .nodes
            .iter()
            .map(|node| (node.uid.as_str(), node))
            .collect();

        // first storage set by name wins when two claim the same node
        let mut sorted: Vec<&CStorClusterStorageSet> = observed.iter().collect();
        sorted.sort_by(|a, b| a.name_any().cmp(&b.name_any()));
        let mut by_node: BTreeMap<&str, &CStorClusterStorageSet> = BTreeMap::new();
        for storage_set in sorted {
            by_node
                .entry(storage_set.spec.node.uid.as_str())
                .or_insert(storage_set);
        }

        Ok(Self {
            plan_name: plan.name_any(),
            plan_uid,
            namespace: plan.namespace(),
            owner,
            desired,
            observed: by_node,
            disk,
            external,
        })
    }

    /// Bucket every node uid and pair removals with creations
    pub fn buckets(&self) -> PlanBuckets {
        let desired: BTreeSet<&str> = self.desired.keys().copied().collect();
        let observed: BTreeSet<&str> = self.observed.keys().copied().collect();

        let noop: Vec<String> = desired.intersection(&observed).map(|s| s.to_string()).collect();
        let mut create: Vec<String> = desired.difference(&observed).map(|s| s.to_string()).collect();
        let mut remove: Vec<String> = observed.difference(&desired).map(|s| s.to_string()).collect();

        let pairs = create.len().min(remove.len());
        let update: Vec<(String, String)> = remove
            .drain(..pairs)
            .zip(create.drain(..pairs))
            .collect();

        PlanBuckets {
            noop,
            create,
            remove,
            update,
        }
    }

    /// Per node actions in bucket order
    pub fn actions(&self) -> Vec<NodeAction> {
        let buckets = self.buckets();
        let node = |uid: &str| PlannedNode::clone(self.desired[uid]);

        let mut actions = Vec::new();
        actions.extend(buckets.noop.iter().map(|uid| NodeAction::Noop { node: node(uid.as_str()) }));
        actions.extend(buckets.update.iter().map(|(from, to)| NodeAction::Update {
            from_uid: from.clone(),
            to: node(to.as_str()),
        }));
        actions.extend(buckets.create.iter().map(|uid| NodeAction::Create { node: node(uid.as_str()) }));
        actions.extend(
            buckets
                .remove
                .iter()
                .map(|uid| NodeAction::Remove { node_uid: uid.clone() }),
        );
        actions
    }

    /// Desired storage sets; anything observed but absent here is deleted
    pub fn plan(&self) -> Vec<CStorClusterStorageSet> {
        let mut desired: Vec<CStorClusterStorageSet> = Vec::new();

        for action in self.actions() {
            match action {
                NodeAction::Noop { node } => {
                    let existing = self.observed[node.uid.as_str()];
                    desired.push(self.desired_from(existing, existing.spec.node.clone()));
                }
                NodeAction::Update { from_uid, to } => {
                    let existing = self.observed[from_uid.as_str()];
                    info!(
                        storage_set = %existing.name_any(),
                        from = %existing.spec.node.name,
                        to = %to.name,
                        "retargeting storage set to replacement node"
                    );
                    desired.push(self.desired_from(existing, to));
                }
                NodeAction::Create { node } => {
                    debug!(node = %node.name, "creating storage set");
                    desired.push(self.new_storage_set(node));
                }
                NodeAction::Remove { node_uid } => {
                    debug!(node_uid = %node_uid, "dropping storage set");
                }
            }
        }

        desired.sort_by(|a, b| a.name_any().cmp(&b.name_any()));
        desired
    }

    fn spec_for(&self, node: PlannedNode) -> CStorClusterStorageSetSpec {
        CStorClusterStorageSetSpec {
            node,
            disk: self.disk.clone(),
            external_provision: self.external.clone(),
        }
    }

    fn metadata(&self, name: String) -> ObjectMeta {
        let mut meta = ObjectMeta {
            name: Some(name),
            namespace: self.namespace.clone(),
            owner_references: Some(vec![self.owner.clone()]),
            ..Default::default()
        };
        correlate(&mut meta, CLUSTER_PLAN_UID_KEY, &self.plan_uid);
        meta
    }

    fn new_storage_set(&self, node: PlannedNode) -> CStorClusterStorageSet {
        let name = storage_set_name(&self.plan_name, &node.uid);
        let mut storage_set = CStorClusterStorageSet::new(&name, self.spec_for(node));
        storage_set.metadata = self.metadata(name);
        storage_set
    }

    fn desired_from(
        &self,
        existing: &CStorClusterStorageSet,
        node: PlannedNode,
    ) -> CStorClusterStorageSet {
        let name = existing.name_any();
        let mut storage_set = CStorClusterStorageSet::new(&name, self.spec_for(node));
        storage_set.metadata = self.metadata(name);
        storage_set
    }
}

/// Deterministic storage set name for a plan and node
pub fn storage_set_name(plan_name: &str, node_uid: &str) -> String {
    format!("{}-{}", plan_name, node_uid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(nodes: &[(&str, &str)]) -> CStorClusterPlan {
        let mut plan = CStorClusterPlan::new(
            "cluster-a",
            crate::crd::CStorClusterPlanSpec {
                nodes: nodes.iter().map(|(n, u)| PlannedNode::new(*n, *u)).collect(),
            },
        );
        plan.metadata.uid = Some("plan-uid".into());
        plan.metadata.namespace = Some("openebs".into());
        plan
    }

    fn storage_set(name: &str, node: &str, uid: &str) -> CStorClusterStorageSet {
        let mut ss = CStorClusterStorageSet::new(
            name,
            CStorClusterStorageSetSpec {
                node: PlannedNode::new(node, uid),
                disk: disk(),
                external_provision: None,
            },
        );
        ss.metadata.uid = Some(format!("ss-{}", uid));
        ss
    }

    fn disk() -> DiskRequest {
        DiskRequest {
            capacity: "100Gi".into(),
            count: 2,
        }
    }

    #[test]
    fn test_replacement_pairing() {
        let plan = plan(&[("node-b", "B"), ("node-c", "C")]);
        let observed = vec![
            storage_set("ss-a", "node-a", "A"),
            storage_set("ss-b", "node-b", "B"),
        ];
        let planner = StorageSetPlanner::new(&plan, &observed, disk(), None).unwrap();

        let buckets = planner.buckets();
        assert_eq!(buckets.noop, vec!["B"]);
        assert_eq!(buckets.update, vec![("A".to_string(), "C".to_string())]);
        assert!(buckets.create.is_empty());
        assert!(buckets.remove.is_empty());

        let desired = planner.plan();
        assert_eq!(desired.len(), 2);
        // ss-a keeps its identity but now targets node C
        assert_eq!(desired[0].name_any(), "ss-a");
        assert_eq!(desired[0].spec.node, PlannedNode::new("node-c", "C"));
        assert_eq!(desired[1].name_any(), "ss-b");
        assert_eq!(desired[1].spec.node, PlannedNode::new("node-b", "B"));
    }

    #[test]
    fn test_create_and_remove_leftovers() {
        let plan = plan(&[("node-c", "C"), ("node-d", "D"), ("node-e", "E")]);
        let observed = vec![storage_set("ss-a", "node-a", "A")];
        let planner = StorageSetPlanner::new(&plan, &observed, disk(), None).unwrap();

        let buckets = planner.buckets();
        assert_eq!(buckets.update, vec![("A".to_string(), "C".to_string())]);
        assert_eq!(buckets.create, vec!["D", "E"]);

        let names: Vec<String> = planner.plan().iter().map(|s| s.name_any()).collect();
        assert_eq!(names, vec!["cluster-a-D", "cluster-a-E", "ss-a"]);

        let plan = self::plan(&[]);
        let planner = StorageSetPlanner::new(&plan, &observed, disk(), None).unwrap();
        assert_eq!(planner.buckets().remove, vec!["A"]);
        assert!(planner.plan().is_empty());
    }

    #[test]
    fn test_created_storage_sets_are_correlated_and_owned() {
        let plan = plan(&[("node-a", "A")]);
        let planner = StorageSetPlanner::new(&plan, &[], disk(), None).unwrap();
        let desired = planner.plan();

        let ss = &desired[0];
        assert_eq!(ss.name_any(), storage_set_name("cluster-a", "A"));
        assert_eq!(ss.namespace().as_deref(), Some("openebs"));
        assert!(crate::crd::is_correlated(&ss.metadata, CLUSTER_PLAN_UID_KEY, "plan-uid"));
        let owners = ss.metadata.owner_references.as_ref().unwrap();
        assert_eq!(owners[0].uid, "plan-uid");
        assert_eq!(owners[0].controller, Some(true));
    }

    #[test]
    fn test_plan_is_idempotent() {
        let plan = plan(&[("node-b", "B"), ("node-c", "C")]);
        let observed = vec![storage_set("ss-a", "node-a", "A")];
        let first = StorageSetPlanner::new(&plan, &observed, disk(), None)
            .unwrap()
            .plan();

        // feed the planned objects back in as observed state
        let observed: Vec<CStorClusterStorageSet> = first.clone();
        let second = StorageSetPlanner::new(&plan, &observed, disk(), None)
            .unwrap()
            .plan();
        assert_eq!(first, second);
        assert!(StorageSetPlanner::new(&plan, &observed, disk(), None)
            .unwrap()
            .buckets()
            .update
            .is_empty());
    }
}
