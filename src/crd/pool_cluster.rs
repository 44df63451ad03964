//! CStorPoolCluster mirror
//!
//! The terminal output of the planner: one pool per node, each built from
//! ordered raid groups of block devices.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::HOSTNAME_LABEL;
use crate::domain::RaidType;

/// Compression policy written into every pool
pub const POOL_COMPRESSION: &str = "off";

/// Clustered cStor pool
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cstor.openebs.io",
    version = "v1",
    kind = "CStorPoolCluster",
    plural = "cstorpoolclusters",
    shortname = "cspc",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CStorPoolClusterSpec {
    #[serde(default)]
    pub pools: Vec<PoolSpec>,
}

/// Pool hosted by a single node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolSpec {
    pub node_selector: BTreeMap<String, String>,

    #[serde(default)]
    pub raid_groups: Vec<RaidGroupSpec>,

    pub pool_config: PoolConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RaidGroupSpec {
    pub r#type: RaidType,

    #[serde(default)]
    pub block_devices: Vec<BlockDeviceRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceRef {
    pub block_device_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    pub default_raid_group_type: RaidType,
    #[serde(default)]
    pub over_provisioning: bool,
    pub compression: String,
}

impl PoolConfig {
    pub fn for_raid(raid: RaidType) -> Self {
        Self {
            default_raid_group_type: raid,
            over_provisioning: false,
            compression: POOL_COMPRESSION.to_string(),
        }
    }
}

impl PoolSpec {
    /// Node this pool is pinned to
    pub fn node_name(&self) -> Option<&str> {
        self.node_selector.get(HOSTNAME_LABEL).map(String::as_str)
    }

    /// Device names in raid group order
    pub fn device_names(&self) -> Vec<String> {
        self.raid_groups
            .iter()
            .flat_map(|group| group.block_devices.iter())
            .map(|bd| bd.block_device_name.clone())
            .collect()
    }
}

impl CStorPoolCluster {
    /// Observed device order for `node`, empty if no pool targets it
    pub fn device_order_for(&self, node: &str) -> Vec<String> {
        self.spec
            .pools
            .iter()
            .find(|pool| pool.node_name() == Some(node))
            .map(PoolSpec::device_names)
            .unwrap_or_default()
    }
}
