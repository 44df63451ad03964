//! CStorClusterConfig CRD
//!
//! The user facing intent: how many pools, which raid layout, and what the
//! disks backing every pool look like. Every field may be left out; the
//! defaulting evaluator fills in the gaps.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::status::ClusterStatus;
use crate::planner::selector::Selector;

// =============================================================================
// CStorClusterConfig CRD
// =============================================================================

/// CStorClusterConfig declares a clustered cStor pool at a high level.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "dao.mayadata.io",
    version = "v1alpha1",
    kind = "CStorClusterConfig",
    plural = "cstorclusterconfigs",
    shortname = "cscc",
    status = "ClusterStatus",
    printcolumn = r#"{"name": "MinPools", "type": "integer", "jsonPath": ".spec.minPoolCount"}"#,
    printcolumn = r#"{"name": "Raid", "type": "string", "jsonPath": ".spec.poolConfig.raidType"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CStorClusterConfigSpec {
    /// Nodes allowed to host a pool
    #[serde(default)]
    pub allowed_nodes: Selector,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_pool_count: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pool_count: Option<i64>,

    #[serde(default)]
    pub pool_config: PoolConfigIntent,

    #[serde(default)]
    pub disk_config: DiskConfigIntent,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Pool level settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfigIntent {
    /// One of stripe, mirror, raidz, raidz2
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raid_type: Option<String>,
}

/// Disk level settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiskConfigIntent {
    /// Disks per pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_count: Option<i64>,

    /// Minimum capacity of every disk, e.g. "100Gi"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_capacity: Option<String>,

    /// Provision disks through a CSI driver instead of using local ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_provision: Option<ExternalProvision>,

    /// Filter applied to local block devices
    #[serde(default)]
    pub local_disk_selector: Selector,
}

/// External disk provisioner; both names are required together
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalProvision {
    #[serde(default)]
    pub csi_attacher_name: String,
    #[serde(default)]
    pub storage_class_name: String,
}

impl ExternalProvision {
    pub fn is_complete(&self) -> bool {
        !self.csi_attacher_name.trim().is_empty() && !self.storage_class_name.trim().is_empty()
    }
}
