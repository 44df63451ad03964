//! BlockDevice mirror
//!
//! BlockDevices are discovered and owned by the node disk manager. The
//! operator only reads them and records a provisional reservation through an
//! annotation (plus a label, for orchestrators that drop annotations).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{HOSTNAME_LABEL, STORAGE_SET_UID_KEY};

/// Disk discovered on a node
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "BlockDevice",
    plural = "blockdevices",
    shortname = "bd",
    status = "BlockDeviceStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceSpec {
    #[serde(default)]
    pub capacity: DeviceCapacity,

    #[serde(default)]
    pub node_attributes: NodeAttributes,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapacity {
    /// Size in bytes
    #[serde(default)]
    pub storage: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeAttributes {
    #[serde(default)]
    pub node_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceStatus {
    #[serde(default)]
    pub claim_state: ClaimState,

    #[serde(default)]
    pub state: DeviceState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ClaimState {
    #[default]
    Unclaimed,
    Claimed,
    Released,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum DeviceState {
    Active,
    Inactive,
    #[default]
    Unknown,
}

impl BlockDevice {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Value of the hostname label, falling back to the node attribute
    pub fn host_label(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(HOSTNAME_LABEL))
            .map(String::as_str)
            .or_else(|| {
                Some(self.spec.node_attributes.node_name.as_str()).filter(|n| !n.is_empty())
            })
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.spec.capacity.storage
    }

    pub fn claim_state(&self) -> ClaimState {
        self.status.as_ref().map(|s| s.claim_state).unwrap_or_default()
    }

    pub fn is_active(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| s.state == DeviceState::Active)
            .unwrap_or(false)
    }

    /// Storage set UID this device is reserved for.
    ///
    /// The annotation is authoritative; the label is only consulted when the
    /// annotation is missing.
    pub fn reservation_owner(&self) -> Option<&str> {
        fn lookup(map: &Option<BTreeMap<String, String>>) -> Option<&str> {
            map.as_ref()
                .and_then(|m| m.get(STORAGE_SET_UID_KEY))
                .map(String::as_str)
                .filter(|uid| !uid.is_empty())
        }
        lookup(&self.metadata.annotations).or_else(|| lookup(&self.metadata.labels))
    }

    /// Record a reservation for `owner` on both annotation and label
    pub fn reserve_for(&mut self, owner: &str) {
        self.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(STORAGE_SET_UID_KEY.to_string(), owner.to_string());
        self.metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(STORAGE_SET_UID_KEY.to_string(), owner.to_string());
    }

    /// Drop any reservation marker
    pub fn release(&mut self) {
        if let Some(annotations) = self.metadata.annotations.as_mut() {
            annotations.remove(STORAGE_SET_UID_KEY);
        }
        if let Some(labels) = self.metadata.labels.as_mut() {
            labels.remove(STORAGE_SET_UID_KEY);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservation_round_trip() {
        let mut device = BlockDevice::new("bd-1", BlockDeviceSpec::default());
        assert_eq!(device.reservation_owner(), None);

        device.reserve_for("uid-a");
        assert_eq!(device.reservation_owner(), Some("uid-a"));

        device.release();
        assert_eq!(device.reservation_owner(), None);
    }

    #[test]
    fn test_label_is_fallback_for_reservation() {
        let mut device = BlockDevice::new("bd-1", BlockDeviceSpec::default());
        device.metadata.labels = Some(
            [(STORAGE_SET_UID_KEY.to_string(), "uid-b".to_string())]
                .into_iter()
                .collect(),
        );
        assert_eq!(device.reservation_owner(), Some("uid-b"));
    }

    #[test]
    fn test_host_label_falls_back_to_node_attribute() {
        let mut spec = BlockDeviceSpec::default();
        spec.node_attributes.node_name = "node-001".into();
        let device = BlockDevice::new("bd-1", spec);
        assert_eq!(device.host_label(), Some("node-001"));
    }
}
