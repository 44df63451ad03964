//! CStorClusterPlan CRD
//!
//! The set of nodes that should currently host a pool. Produced from a
//! CStorClusterConfig and consumed by the storage set and pool cluster
//! stages.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::status::ClusterStatus;

/// CStorClusterPlan lists the nodes selected for a cluster config.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "dao.mayadata.io",
    version = "v1alpha1",
    kind = "CStorClusterPlan",
    plural = "cstorclusterplans",
    shortname = "cscp",
    status = "ClusterStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CStorClusterPlanSpec {
    #[serde(default)]
    pub nodes: Vec<PlannedNode>,
}

/// A node identified by UID; the name may change without changing identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlannedNode {
    pub name: String,
    pub uid: String,
}

impl PlannedNode {
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: uid.into(),
        }
    }
}
