//! Hook request/response codec
//!
//! The orchestrator posts the watched object plus its attachments and
//! expects back the full list of attachments it should converge on.
//! Attachments are grouped by `"<Kind>.<apiVersion>"` and then by
//! `"<namespace>/<name>"`.
//!
//! Raw JSON only lives at this boundary; reconcilers decode into the typed
//! resources from [`crate::crd`] through [`HookRequest::watch_as`] and
//! [`Attachments::decode`].

use crate::crd::{ClusterStatus, Condition, ConditionStatus};
use crate::error::{Error, Result};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

// =============================================================================
// Request
// =============================================================================

/// Attachments of a watched object, keyed by kind then by object key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attachments(pub BTreeMap<String, BTreeMap<String, Value>>);

/// Group key of a resource type, e.g. `BlockDevice.openebs.io/v1alpha1`
pub fn group_key<K>() -> String
where
    K: Resource<DynamicType = ()>,
{
    format!("{}.{}", K::kind(&()), K::api_version(&()))
}

impl Attachments {
    /// Decode every attachment of kind `K`; a missing kind is empty
    pub fn decode<K>(&self) -> Result<Vec<K>>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let key = group_key::<K>();
        let Some(group) = self.0.get(&key) else {
            return Ok(Vec::new());
        };

        group
            .values()
            .map(|raw| {
                serde_json::from_value(raw.clone()).map_err(|e| Error::Decode {
                    kind: key.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    /// Decode attachments of kind `K` that point back at `uid` under `key`
    pub fn correlated<K>(&self, key: &str, uid: &str) -> Result<Vec<K>>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        Ok(self
            .decode::<K>()?
            .into_iter()
            .filter(|item| crate::crd::is_correlated(item.meta(), key, uid))
            .collect())
    }

    /// Exactly one attachment of kind `K` correlated to `uid`
    pub fn require_one<K>(&self, key: &str, uid: &str) -> Result<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let mut matches = self.correlated::<K>(key, uid)?;
        if matches.len() > 1 {
            warn!(
                kind = %group_key::<K>(),
                count = matches.len(),
                "several attachments correlate, using the first by name"
            );
            matches.sort_by_key(|item| item.name_any());
        }
        matches.into_iter().next().ok_or_else(|| Error::MissingAttachment {
            kind: K::kind(&()).to_string(),
        })
    }

    /// Add a raw object under its kind; used by tests and local tooling
    pub fn insert<K>(&mut self, item: &K) -> Result<()>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let name = item.name_any();
        let object_key = match item.namespace() {
            Some(ns) => format!("{}/{}", ns, name),
            None => name,
        };
        let raw = to_attachment(item)?;
        self.0
            .entry(group_key::<K>())
            .or_default()
            .insert(object_key, raw);
        Ok(())
    }
}

/// Sync request posted by the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookRequest {
    /// Watched object
    pub watch: Value,

    #[serde(default)]
    pub attachments: Attachments,

    /// The watched object is being deleted
    #[serde(default)]
    pub finalizing: bool,
}

impl HookRequest {
    /// Decode the watched object as `K`
    pub fn watch_as<K>(&self) -> Result<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        if self.watch.is_null() {
            return Err(Error::Decode {
                kind: K::kind(&()).to_string(),
                reason: "watch is empty".into(),
            });
        }
        serde_json::from_value(self.watch.clone()).map_err(|e| Error::Decode {
            kind: K::kind(&()).to_string(),
            reason: e.to_string(),
        })
    }

    /// Current status of the watched object.
    ///
    /// `Ok(None)` when there is no status yet; an error when the status is
    /// present but not in a shape this operator understands.
    pub fn watch_status(&self) -> Result<Option<ClusterStatus>> {
        match self.watch.get("status") {
            None | Some(Value::Null) => Ok(None),
            Some(raw) => serde_json::from_value(raw.clone())
                .map(Some)
                .map_err(|e| Error::Decode {
                    kind: "status".into(),
                    reason: e.to_string(),
                }),
        }
    }
}

// =============================================================================
// Response
// =============================================================================

/// Sync response returned to the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookResponse {
    /// Every attachment that should exist; anything left out is deleted
    #[serde(default)]
    pub attachments: Vec<Value>,

    /// Leave the current attachments untouched this round
    #[serde(default)]
    pub skip_reconcile: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resync_after_seconds: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
}

impl HookResponse {
    /// Converge on `attachments`
    pub fn apply(attachments: Vec<Value>) -> Self {
        Self {
            attachments,
            ..Default::default()
        }
    }

    /// Change nothing and come back after `seconds`
    pub fn retry_after(seconds: u64) -> Self {
        Self {
            skip_reconcile: true,
            resync_after_seconds: Some(seconds as f64),
            ..Default::default()
        }
    }

    /// Change nothing
    pub fn skip() -> Self {
        Self {
            skip_reconcile: true,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: Option<Value>) -> Self {
        self.status = status;
        self
    }
}

/// Serialize a typed resource as an attachment, with `apiVersion` and `kind`
pub fn to_attachment<K>(item: &K) -> Result<Value>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let mut raw = serde_json::to_value(item)?;
    let obj = raw
        .as_object_mut()
        .ok_or_else(|| Error::Internal(format!("{} did not serialize to an object", K::kind(&()))))?;
    obj.insert("apiVersion".into(), Value::String(K::api_version(&()).into()));
    obj.insert("kind".into(), Value::String(K::kind(&()).into()));
    Ok(raw)
}

// =============================================================================
// Status
// =============================================================================

/// Status to write after merging `condition` into the watched object's
/// current status.
///
/// Returns `None`, meaning leave status alone, when the current status cannot
/// be decoded or when the merge would not change anything but timestamps.
pub fn status_update(request: &HookRequest, condition: Condition) -> Option<Value> {
    let current = match request.watch_status() {
        Ok(current) => current,
        Err(e) => {
            warn!(error = %e, "existing status is unreadable, leaving it untouched");
            return None;
        }
    };

    if let Some(existing) = current.as_ref().and_then(|s| s.condition(&condition.r#type)) {
        let same = existing.status == condition.status
            && existing.reason == condition.reason
            && existing.message == condition.message;
        if same {
            return None;
        }
    }

    // nothing to clear on an object that never failed
    if current.is_none() && condition.status != ConditionStatus::True {
        return None;
    }

    let mut status = current.unwrap_or_default();
    status.merge_conditions([condition]);
    serde_json::to_value(status).ok()
}

/// Status clearing a previous `condition_type` error, if there was one
pub fn resolved_status(request: &HookRequest, condition_type: &str) -> Option<Value> {
    status_update(request, Condition::resolved(condition_type))
}

/// Status recording `err` under `condition_type`
pub fn error_status(request: &HookRequest, condition_type: &str, err: &Error) -> Option<Value> {
    let condition = Condition {
        r#type: condition_type.to_string(),
        ..Condition::error(err.reason(), err.to_string())
    };
    status_update(request, condition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        BlockDevice, BlockDeviceSpec, CStorClusterConfig, CStorClusterConfigSpec, Phase,
        CONDITION_RECONCILE_ERROR, STORAGE_SET_UID_KEY,
    };
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn test_request_decodes_orchestrator_payload() {
        let raw = json!({
            "watch": {
                "apiVersion": "dao.mayadata.io/v1alpha1",
                "kind": "CStorClusterConfig",
                "metadata": {"name": "cluster-a", "namespace": "openebs", "uid": "cfg-1"},
                "spec": {"minPoolCount": 2}
            },
            "attachments": {
                "BlockDevice.openebs.io/v1alpha1": {
                    "openebs/bd-1": {
                        "apiVersion": "openebs.io/v1alpha1",
                        "kind": "BlockDevice",
                        "metadata": {"name": "bd-1", "namespace": "openebs"},
                        "spec": {"capacity": {"storage": 1024}}
                    }
                }
            }
        });

        let request: HookRequest = serde_json::from_value(raw).unwrap();
        assert!(!request.finalizing);

        let config: CStorClusterConfig = request.watch_as().unwrap();
        assert_eq!(config.spec.min_pool_count, Some(2));

        let devices: Vec<BlockDevice> = request.attachments.decode().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].capacity_bytes(), 1024);

        // kinds that were never attached are simply empty
        let configs: Vec<CStorClusterConfig> = request.attachments.decode().unwrap();
        assert!(configs.is_empty());
    }

    #[test]
    fn test_correlated_filters_foreign_objects() {
        let mut attachments = Attachments::default();
        let mut mine = BlockDevice::new("bd-1", BlockDeviceSpec::default());
        mine.reserve_for("set-a");
        let mut theirs = BlockDevice::new("bd-2", BlockDeviceSpec::default());
        theirs.reserve_for("set-b");
        attachments.insert(&mine).unwrap();
        attachments.insert(&theirs).unwrap();

        let devices: Vec<BlockDevice> = attachments.correlated(STORAGE_SET_UID_KEY, "set-a").unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name(), "bd-1");

        assert_matches!(
            attachments.require_one::<BlockDevice>(STORAGE_SET_UID_KEY, "set-c"),
            Err(Error::MissingAttachment { .. })
        );
    }

    #[test]
    fn test_bad_attachment_is_a_decode_error() {
        let mut attachments = Attachments::default();
        attachments.0.entry(group_key::<BlockDevice>()).or_default().insert(
            "openebs/bd-1".into(),
            json!({"metadata": {"name": "bd-1"}, "spec": {"capacity": {"storage": "lots"}}}),
        );
        assert_matches!(
            attachments.decode::<BlockDevice>(),
            Err(Error::Decode { .. })
        );
    }

    #[test]
    fn test_response_wire_format() {
        let response = HookResponse::retry_after(3);
        let raw = serde_json::to_value(&response).unwrap();
        assert_eq!(
            raw,
            json!({"attachments": [], "skipReconcile": true, "resyncAfterSeconds": 3.0})
        );
    }

    #[test]
    fn test_to_attachment_sets_type_meta() {
        let config = CStorClusterConfig::new("cluster-a", CStorClusterConfigSpec::default());
        let raw = to_attachment(&config).unwrap();
        assert_eq!(raw["kind"], "CStorClusterConfig");
        assert_eq!(raw["apiVersion"], "dao.mayadata.io/v1alpha1");
    }

    #[test]
    fn test_error_status_is_merged_and_not_repeated() {
        let mut request = HookRequest {
            watch: json!({"metadata": {"name": "cluster-a"}}),
            ..Default::default()
        };
        let err = Error::Validation("maxPoolCount < minPoolCount".into());

        let status = error_status(&request, CONDITION_RECONCILE_ERROR, &err).unwrap();
        let decoded: ClusterStatus = serde_json::from_value(status.clone()).unwrap();
        assert_eq!(decoded.phase, Some(Phase::Error));

        // same error again: no status write
        request.watch["status"] = status;
        assert!(error_status(&request, CONDITION_RECONCILE_ERROR, &err).is_none());

        // recovering clears the condition
        let cleared = resolved_status(&request, CONDITION_RECONCILE_ERROR).unwrap();
        let cleared: ClusterStatus = serde_json::from_value(cleared).unwrap();
        assert_eq!(cleared.phase, Some(Phase::Online));
    }

    #[test]
    fn test_unreadable_status_is_left_alone() {
        let request = HookRequest {
            watch: json!({"metadata": {"name": "cluster-a"}, "status": {"conditions": "broken"}}),
            ..Default::default()
        };
        let err = Error::Validation("bad".into());
        assert!(error_status(&request, CONDITION_RECONCILE_ERROR, &err).is_none());
        assert!(resolved_status(&request, CONDITION_RECONCILE_ERROR).is_none());
    }

    #[test]
    fn test_healthy_object_gets_no_status_write() {
        let request = HookRequest {
            watch: json!({"metadata": {"name": "cluster-a"}}),
            ..Default::default()
        };
        assert!(resolved_status(&request, CONDITION_RECONCILE_ERROR).is_none());
    }
}
