//! Custom Resource Definitions
//!
//! Owned resources:
//! - CStorClusterConfig: user intent
//! - CStorClusterPlan: nodes selected for a config
//! - CStorClusterStorageSet: per node disk requirement
//!
//! Observed or produced, owned elsewhere:
//! - BlockDevice: disks discovered by the node disk manager
//! - CStorPoolCluster: the assembled pool cluster

pub mod block_device;
pub mod cluster_config;
pub mod cluster_plan;
pub mod pool_cluster;
pub mod status;
pub mod storage_set;

pub use block_device::*;
pub use cluster_config::*;
pub use cluster_plan::*;
pub use pool_cluster::*;
pub use status::*;
pub use storage_set::*;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::CustomResourceExt;

// =============================================================================
// Correlation Keys
// =============================================================================

/// Node label every pool is pinned with
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Set on a plan and on the pool cluster: UID of the originating config
pub const CLUSTER_CONFIG_UID_KEY: &str = "dao.mayadata.io/cstorclusterconfig-uid";

/// Set on storage sets and on the pool cluster: UID of the owning plan
pub const CLUSTER_PLAN_UID_KEY: &str = "dao.mayadata.io/cstorclusterplan-uid";

/// Set on block devices and disk claims: UID of the reserving storage set
pub const STORAGE_SET_UID_KEY: &str = "dao.mayadata.io/cstorclusterstorageset-uid";

/// Set on disk claims: CSI attacher expected to attach the disk
pub const CSI_ATTACHER_KEY: &str = "dao.mayadata.io/csi-attacher-name";

/// True if `meta` points back at `uid` under `key`.
///
/// Annotations are preferred; labels are checked too because some
/// orchestrators do not propagate annotations on attachments.
pub fn is_correlated(meta: &ObjectMeta, key: &str, uid: &str) -> bool {
    correlation_uid(meta, key) == Some(uid)
}

/// Correlation UID stored on `meta` under `key`
pub fn correlation_uid<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    let lookup = |map: &'a Option<std::collections::BTreeMap<String, String>>| {
        map.as_ref()
            .and_then(|m| m.get(key))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    };
    lookup(&meta.annotations).or_else(|| lookup(&meta.labels))
}

/// Record `uid` under `key` as both annotation and label
pub fn correlate(meta: &mut ObjectMeta, key: &str, uid: &str) {
    meta.annotations
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), uid.to_string());
    meta.labels
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), uid.to_string());
}

/// Definitions of the resources this operator owns
pub fn owned_crds() -> Vec<CustomResourceDefinition> {
    vec![
        CStorClusterConfig::crd(),
        CStorClusterPlan::crd(),
        CStorClusterStorageSet::crd(),
    ]
}
