//! CStorClusterStorageSet CRD
//!
//! One per planned node: the disks that node must contribute to the pool.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::cluster_config::ExternalProvision;
use super::cluster_plan::PlannedNode;
use super::status::ClusterStatus;

/// CStorClusterStorageSet binds a disk requirement to one node.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "dao.mayadata.io",
    version = "v1alpha1",
    kind = "CStorClusterStorageSet",
    plural = "cstorclusterstoragesets",
    shortname = "cscss",
    status = "ClusterStatus",
    printcolumn = r#"{"name": "Node", "type": "string", "jsonPath": ".spec.node.name"}"#,
    printcolumn = r#"{"name": "Disks", "type": "integer", "jsonPath": ".spec.disk.count"}"#,
    printcolumn = r#"{"name": "Capacity", "type": "string", "jsonPath": ".spec.disk.capacity"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CStorClusterStorageSetSpec {
    pub node: PlannedNode,

    pub disk: DiskRequest,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_provision: Option<ExternalProvision>,
}

/// Disk requirement of a storage set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiskRequest {
    /// Minimum capacity of every disk
    pub capacity: String,
    /// Number of disks
    pub count: i64,
}

impl CStorClusterStorageSet {
    pub fn uid(&self) -> Option<&str> {
        self.metadata.uid.as_deref()
    }

    pub fn node_name(&self) -> &str {
        &self.spec.node.name
    }

    pub fn desired_disk_count(&self) -> usize {
        self.spec.disk.count.max(0) as usize
    }
}
