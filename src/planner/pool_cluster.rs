//! Pool-Cluster Assembler
//!
//! Builds the CStorPoolCluster once every planned node has a storage set and
//! every storage set holds enough devices. Until then it reports `NotReady`
//! and emits nothing.

use crate::crd::{
    correlate, BlockDeviceRef, CStorClusterConfig, CStorClusterPlan, CStorClusterStorageSet,
    CStorPoolCluster, CStorPoolClusterSpec, PoolConfig, PoolSpec, RaidGroupSpec,
    CLUSTER_CONFIG_UID_KEY, CLUSTER_PLAN_UID_KEY, HOSTNAME_LABEL,
};
use crate::domain::RaidType;
use crate::error::{Error, Result};
use crate::planner::device::{
    distribute, final_device_list, is_ready_by_node_count, is_ready_by_node_disk_count, RaidGroup,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::debug;

/// Outcome of one assembly attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Assembly {
    Ready(CStorPoolCluster),
    NotReady { reason: String },
}

impl Assembly {
    fn not_ready(reason: impl Into<String>) -> Self {
        Assembly::NotReady {
            reason: reason.into(),
        }
    }
}

/// Everything the assembler looks at for one plan
pub struct AssemblyInput<'a> {
    pub plan: &'a CStorClusterPlan,
    pub config: Option<&'a CStorClusterConfig>,
    pub storage_sets: &'a [CStorClusterStorageSet],
    /// Devices reserved per storage set UID
    pub reserved: &'a BTreeMap<String, Vec<String>>,
    pub observed: Option<&'a CStorPoolCluster>,
}

/// Raid layout requested by a config; absent means the default layout
pub fn resolve_raid_type(config: &CStorClusterConfig) -> Result<RaidType> {
    match config.spec.pool_config.raid_type.as_deref() {
        None | Some("") => Ok(RaidType::default()),
        Some(raw) => raw.parse(),
    }
}

/// Gate on readiness, then build the pool cluster for `input.plan`
pub fn assemble(input: &AssemblyInput<'_>) -> Result<Assembly> {
    let plan = input.plan;
    let plan_uid = plan
        .uid()
        .ok_or_else(|| Error::Validation("cluster plan has no uid".into()))?;
    let config = input.config.ok_or_else(|| Error::MissingAttachment {
        kind: "CStorClusterConfig".into(),
    })?;
    let config_uid = config
        .uid()
        .ok_or_else(|| Error::Validation("cluster config has no uid".into()))?;
    let raid_type = resolve_raid_type(config)?;

    let nodes = &plan.spec.nodes;
    if nodes.is_empty() {
        return Ok(Assembly::not_ready("cluster plan has no nodes"));
    }
    if !is_ready_by_node_count(nodes.len(), input.storage_sets.len()) {
        return Ok(Assembly::not_ready(format!(
            "{} of {} storage sets observed",
            input.storage_sets.len(),
            nodes.len()
        )));
    }

    let counts = input
        .storage_sets
        .iter()
        .map(|set| (set.desired_disk_count(), reserved_for(input.reserved, set).len()));
    if !is_ready_by_node_disk_count(counts) {
        return Ok(Assembly::not_ready("storage sets are still waiting for devices"));
    }

    let mut pools = Vec::with_capacity(nodes.len());
    for node in nodes {
        let Some(storage_set) = input
            .storage_sets
            .iter()
            .find(|set| set.spec.node.uid == node.uid)
        else {
            return Ok(Assembly::not_ready(format!(
                "no storage set for node {}",
                node.name
            )));
        };

        let observed_order = input
            .observed
            .map(|cspc| cspc.device_order_for(&node.name))
            .unwrap_or_default();
        let desired = pick_devices(
            &observed_order,
            reserved_for(input.reserved, storage_set),
            storage_set.desired_disk_count(),
        );
        let devices = final_device_list(&observed_order, &desired);
        let groups = distribute(&node.name, &devices, raid_type)?;
        if groups.is_empty() {
            return Err(Error::Validation(format!(
                "storage set {} asks for no disks so node {} would get an empty pool",
                storage_set.name_any(),
                node.name
            )));
        }

        debug!(node = %node.name, devices = devices.len(), groups = groups.len(), "assembled pool");
        pools.push(pool_spec(&node.name, groups, raid_type));
    }

    let name = plan.name_any();
    let mut cspc = CStorPoolCluster::new(&name, CStorPoolClusterSpec { pools });
    cspc.metadata = metadata(plan, &name, &plan_uid, &config_uid)?;
    Ok(Assembly::Ready(cspc))
}

fn reserved_for<'r>(
    reserved: &'r BTreeMap<String, Vec<String>>,
    storage_set: &CStorClusterStorageSet,
) -> &'r [String] {
    storage_set
        .uid()
        .and_then(|uid| reserved.get(uid))
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Devices a node should contribute: those already in its pool first, then
/// the rest in name order, capped at the desired count
fn pick_devices(observed_order: &[String], reserved: &[String], count: usize) -> Vec<String> {
    let mut sorted: Vec<&String> = reserved.iter().collect();
    sorted.sort();

    let mut picked: Vec<String> = observed_order
        .iter()
        .filter(|name| reserved.contains(*name))
        .take(count)
        .cloned()
        .collect();
    for name in sorted {
        if picked.len() >= count {
            break;
        }
        if !picked.contains(name) {
            picked.push(name.clone());
        }
    }
    picked
}

fn pool_spec(node: &str, groups: Vec<RaidGroup>, raid_type: RaidType) -> PoolSpec {
    PoolSpec {
        node_selector: [(HOSTNAME_LABEL.to_string(), node.to_string())].into(),
        raid_groups: groups
            .into_iter()
            .map(|group| RaidGroupSpec {
                r#type: group.raid_type,
                block_devices: group
                    .devices
                    .into_iter()
                    .map(|block_device_name| BlockDeviceRef { block_device_name })
                    .collect(),
            })
            .collect(),
        pool_config: PoolConfig::for_raid(raid_type),
    }
}

fn metadata(
    plan: &CStorClusterPlan,
    name: &str,
    plan_uid: &str,
    config_uid: &str,
) -> Result<ObjectMeta> {
    let owner = plan.controller_owner_ref(&()).ok_or_else(|| {
        Error::Validation("cluster plan has no name or uid for owner reference".into())
    })?;
    let mut meta = ObjectMeta {
        name: Some(name.to_string()),
        namespace: plan.namespace(),
        owner_references: Some(vec![owner]),
        ..Default::default()
    };
    correlate(&mut meta, CLUSTER_PLAN_UID_KEY, plan_uid);
    correlate(&mut meta, CLUSTER_CONFIG_UID_KEY, config_uid);
    Ok(meta)
}
