//! CStorClusterStorageSet hook, device stage
//!
//! Watches a storage set with the namespace's block devices, its plan and
//! the plan's config attached. Reserves devices on the storage set's node
//! through the reservation ledger and, when an external provisioner is
//! configured, asks for the node's disks through persistent volume claims.

use super::cluster_plan::config_of;
use super::{HookContext, Reconciled, Reconciler};
use crate::controlplane::hook::{to_attachment, HookRequest};
use crate::crd::{
    correlate, correlation_uid, BlockDevice, CStorClusterPlan, CStorClusterStorageSet,
    ExternalProvision, CLUSTER_PLAN_UID_KEY, CSI_ATTACHER_KEY, STORAGE_SET_UID_KEY,
};
use crate::domain::parse_quantity;
use crate::domain::ports::ClaimRequest;
use crate::error::{Error, Result};
use crate::planner::{plan_reservations, ReservationRequest};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// Annotation the scheduler reads to bind a claim's volume to a node
const SELECTED_NODE_ANNOTATION: &str = "volume.kubernetes.io/selected-node";

#[derive(Debug, Default)]
pub struct StorageSetReconciler;

#[async_trait]
impl Reconciler for StorageSetReconciler {
    fn hook(&self) -> &'static str {
        "storageset"
    }

    #[instrument(skip_all, fields(hook = "storageset"))]
    async fn reconcile(&self, request: &HookRequest, ctx: &HookContext) -> Result<Reconciled> {
        let storage_set: CStorClusterStorageSet = request.watch_as()?;
        let owner = storage_set
            .uid()
            .ok_or_else(|| Error::Validation("storage set has no uid".into()))?
            .to_string();

        let plan = plan_of(request, &storage_set)?;
        let config = config_of(request, &plan)?;

        let devices: Vec<BlockDevice> = request.attachments.decode()?;
        let min_capacity_bytes = parse_quantity(&storage_set.spec.disk.capacity)?;
        let reservations = plan_reservations(
            &devices,
            ReservationRequest {
                owner: &owner,
                node_name: storage_set.node_name(),
                selector: &config.spec.disk_config.local_disk_selector,
                min_capacity_bytes,
                desired_count: storage_set.desired_disk_count(),
            },
        )?;

        let by_name: BTreeMap<&str, &BlockDevice> =
            devices.iter().map(|d| (d.name(), d)).collect();
        let mut attachments = Vec::new();

        for name in &reservations.reserved {
            let Some(device) = by_name.get(name.as_str()) else {
                continue;
            };
            let claim = ClaimRequest::new(name.as_str(), owner.as_str())
                .expecting(device.reservation_owner().map(String::from))
                .at_version(device.resource_version());
            match ctx.ledger.claim(claim).await {
                Ok(reservation) => {
                    debug!(
                        device = %reservation.device,
                        generation = reservation.generation,
                        version = ?reservation.observed_version,
                        "device held"
                    );
                    let mut reserved = (*device).clone();
                    reserved.reserve_for(&owner);
                    attachments.push(to_attachment(&reserved)?);
                }
                Err(
                    e @ (Error::ReservationConflict { .. } | Error::StaleReservation { .. }),
                ) => {
                    warn!(device = %name, error = %e, "device lost to another storage set");
                }
                Err(e) => return Err(e),
            }
        }

        for name in &reservations.release {
            ctx.ledger.release(name, &owner).await?;
            if let Some(device) = by_name.get(name.as_str()) {
                let mut released = (*device).clone();
                released.release();
                attachments.push(to_attachment(&released)?);
            }
        }

        info!(
            storage_set = %storage_set.name_any(),
            node = %storage_set.node_name(),
            reserved = reservations.reserved.len(),
            released = reservations.release.len(),
            shortfall = reservations.shortfall,
            "planned device reservations"
        );

        if let Some(external) = &storage_set.spec.external_provision {
            attachments.extend(disk_claims(&storage_set, &owner, external)?);
        }

        Ok(Reconciled::Apply(attachments))
    }

    /// Drop every reservation this storage set holds, in the ledger and on
    /// the devices themselves, so other storage sets can pick them up.
    async fn finalize(&self, request: &HookRequest, ctx: &HookContext) -> Result<Vec<Value>> {
        let storage_set: CStorClusterStorageSet = request.watch_as()?;
        let Some(owner) = storage_set.uid() else {
            return Ok(Vec::new());
        };
        let devices: Vec<BlockDevice> = request.attachments.decode()?;

        let mut ledger_released = 0;
        let mut attachments = Vec::new();
        for device in &devices {
            let held = ctx
                .ledger
                .owner_of(device.name())
                .await?
                .is_some_and(|reservation| reservation.owner == owner);
            if held {
                ctx.ledger.release(device.name(), owner).await?;
                ledger_released += 1;
            }
            if device.reservation_owner() == Some(owner) {
                let mut released = device.clone();
                released.release();
                attachments.push(to_attachment(&released)?);
            }
        }

        info!(
            storage_set = %storage_set.name_any(),
            ledger = ledger_released,
            devices = attachments.len(),
            "released reservations"
        );
        Ok(attachments)
    }
}

/// The plan owning `storage_set`
fn plan_of(request: &HookRequest, storage_set: &CStorClusterStorageSet) -> Result<CStorClusterPlan> {
    let missing = || Error::MissingAttachment {
        kind: "CStorClusterPlan".into(),
    };
    let plan_uid = correlation_uid(storage_set.meta(), CLUSTER_PLAN_UID_KEY).ok_or_else(missing)?;

    request
        .attachments
        .decode::<CStorClusterPlan>()?
        .into_iter()
        .find(|plan| plan.uid().as_deref() == Some(plan_uid))
        .ok_or_else(missing)
}

/// Deterministic name of the `index`th disk claim of a storage set
pub fn disk_claim_name(storage_set: &str, index: usize) -> String {
    format!("{}-disk-{}", storage_set, index)
}

/// One block mode claim per desired disk, pinned to the storage set's node
fn disk_claims(
    storage_set: &CStorClusterStorageSet,
    owner_uid: &str,
    external: &ExternalProvision,
) -> Result<Vec<Value>> {
    let owner = storage_set.controller_owner_ref(&()).ok_or_else(|| {
        Error::Validation("storage set has no name or uid for owner reference".into())
    })?;
    let set_name = storage_set.name_any();

    (0..storage_set.desired_disk_count())
        .map(|index| {
            let mut meta = ObjectMeta {
                name: Some(disk_claim_name(&set_name, index)),
                namespace: storage_set.namespace(),
                owner_references: Some(vec![owner.clone()]),
                ..Default::default()
            };
            correlate(&mut meta, STORAGE_SET_UID_KEY, owner_uid);
            let annotations = meta.annotations.get_or_insert_with(Default::default);
            annotations.insert(CSI_ATTACHER_KEY.into(), external.csi_attacher_name.clone());
            annotations.insert(
                SELECTED_NODE_ANNOTATION.into(),
                storage_set.node_name().to_string(),
            );

            let claim = PersistentVolumeClaim {
                metadata: meta,
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".into()]),
                    volume_mode: Some("Block".into()),
                    storage_class_name: Some(external.storage_class_name.clone()),
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(
                            [(
                                "storage".to_string(),
                                Quantity(storage_set.spec.disk.capacity.clone()),
                            )]
                            .into(),
                        ),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            };
            to_attachment(&claim)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::config::OperatorConfig;
    use crate::controlplane::hook::Attachments;
    use crate::controlplane::reservation::InMemoryReservationLedger;
    use crate::crd::{
        BlockDeviceSpec, BlockDeviceStatus, CStorClusterConfig, CStorClusterPlanSpec,
        CStorClusterStorageSetSpec, ClaimState, DeviceState, DiskRequest, PlannedNode,
        CLUSTER_CONFIG_UID_KEY, HOSTNAME_LABEL,
    };
    use crate::domain::ports::ReservationLedger;
    use std::sync::Arc;

    const GI: u64 = 1 << 30;

    struct Fixture {
        ledger: Arc<InMemoryReservationLedger>,
        ctx: HookContext,
        attachments: Attachments,
    }

    impl Fixture {
        fn new() -> Self {
            let ledger = Arc::new(InMemoryReservationLedger::new());
            let ctx = HookContext::new(OperatorConfig::default(), ledger.clone());

            let mut config = CStorClusterConfig::new("cluster-a", Default::default());
            config.metadata.uid = Some("config-uid".into());
            let mut plan = CStorClusterPlan::new(
                "cluster-a",
                CStorClusterPlanSpec {
                    nodes: vec![PlannedNode::new("n1", "u1")],
                },
            );
            plan.metadata.uid = Some("plan-uid".into());
            correlate(&mut plan.metadata, CLUSTER_CONFIG_UID_KEY, "config-uid");

            let mut attachments = Attachments::default();
            attachments.insert(&config).unwrap();
            attachments.insert(&plan).unwrap();

            Self {
                ledger,
                ctx,
                attachments,
            }
        }

        fn device(&mut self, name: &str, node: &str) {
            let mut spec = BlockDeviceSpec::default();
            spec.capacity.storage = 200 * GI;
            let mut device = BlockDevice::new(name, spec);
            device.metadata.labels = Some([(HOSTNAME_LABEL.to_string(), node.to_string())].into());
            device.status = Some(BlockDeviceStatus {
                claim_state: ClaimState::Unclaimed,
                state: DeviceState::Active,
            });
            self.attachments.insert(&device).unwrap();
        }

        fn request(&self, external: Option<ExternalProvision>) -> HookRequest {
            let mut set = CStorClusterStorageSet::new(
                "cluster-a-u1",
                CStorClusterStorageSetSpec {
                    node: PlannedNode::new("n1", "u1"),
                    disk: DiskRequest {
                        capacity: "100Gi".into(),
                        count: 2,
                    },
                    external_provision: external,
                },
            );
            set.metadata.namespace = Some("openebs".into());
            set.metadata.uid = Some("set-uid".into());
            correlate(&mut set.metadata, CLUSTER_PLAN_UID_KEY, "plan-uid");
            HookRequest {
                watch: to_attachment(&set).unwrap(),
                attachments: self.attachments.clone(),
                finalizing: false,
            }
        }
    }

    fn attachments_of_kind(reconciled: Reconciled, kind: &str) -> Vec<Value> {
        match reconciled {
            Reconciled::Apply(attachments) => attachments
                .into_iter()
                .filter(|a| a["kind"] == kind)
                .collect(),
            other => panic!("expected attachments, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reserves_devices_on_own_node() {
        let mut fixture = Fixture::new();
        fixture.device("bd-2", "n1");
        fixture.device("bd-1", "n1");
        fixture.device("bd-3", "n1");
        fixture.device("bd-9", "n2");

        let reconciled = StorageSetReconciler
            .reconcile(&fixture.request(None), &fixture.ctx)
            .await
            .unwrap();
        let devices: Vec<BlockDevice> = attachments_of_kind(reconciled, "BlockDevice")
            .into_iter()
            .map(|raw| serde_json::from_value(raw).unwrap())
            .collect();

        let names: Vec<&str> = devices.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["bd-1", "bd-2"]);
        assert!(devices.iter().all(|d| d.reservation_owner() == Some("set-uid")));
        assert_eq!(fixture.ledger.reserved_count(), 2);
    }

    #[tokio::test]
    async fn test_device_lost_to_another_set_is_dropped() {
        let mut fixture = Fixture::new();
        fixture.device("bd-1", "n1");
        fixture.device("bd-2", "n1");
        fixture
            .ledger
            .claim(ClaimRequest::new("bd-1", "other-set"))
            .await
            .unwrap();

        let reconciled = StorageSetReconciler
            .reconcile(&fixture.request(None), &fixture.ctx)
            .await
            .unwrap();
        let devices = attachments_of_kind(reconciled, "BlockDevice");
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0]["metadata"]["name"], "bd-2");
    }

    #[tokio::test]
    async fn test_external_provision_emits_disk_claims() {
        let fixture = Fixture::new();
        let external = ExternalProvision {
            csi_attacher_name: "pd.csi.storage.gke.io".into(),
            storage_class_name: "fast-block".into(),
        };

        let reconciled = StorageSetReconciler
            .reconcile(&fixture.request(Some(external)), &fixture.ctx)
            .await
            .unwrap();
        let claims: Vec<PersistentVolumeClaim> =
            attachments_of_kind(reconciled, "PersistentVolumeClaim")
                .into_iter()
                .map(|raw| serde_json::from_value(raw).unwrap())
                .collect();

        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0].name_any(), "cluster-a-u1-disk-0");
        assert_eq!(claims[1].name_any(), "cluster-a-u1-disk-1");
        let spec = claims[0].spec.as_ref().unwrap();
        assert_eq!(spec.volume_mode.as_deref(), Some("Block"));
        assert_eq!(spec.storage_class_name.as_deref(), Some("fast-block"));
        assert_eq!(
            claims[0].annotations().get(CSI_ATTACHER_KEY).map(String::as_str),
            Some("pd.csi.storage.gke.io")
        );
    }

    #[tokio::test]
    async fn test_finalize_releases_ledger_entries() {
        let mut fixture = Fixture::new();
        fixture.device("bd-1", "n1");
        fixture.device("bd-2", "n1");

        let request = fixture.request(None);
        let reconciled = StorageSetReconciler
            .reconcile(&request, &fixture.ctx)
            .await
            .unwrap();
        assert_eq!(fixture.ledger.reserved_count(), 2);

        // the orchestrator now observes the reservation annotations
        let mut finalizing = request.clone();
        finalizing.attachments = Attachments::default();
        for raw in attachments_of_kind(reconciled, "BlockDevice") {
            let device: BlockDevice = serde_json::from_value(raw).unwrap();
            finalizing.attachments.insert(&device).unwrap();
        }
        finalizing.finalizing = true;

        let released: Vec<BlockDevice> = StorageSetReconciler
            .finalize(&finalizing, &fixture.ctx)
            .await
            .unwrap()
            .into_iter()
            .map(|raw| serde_json::from_value(raw).unwrap())
            .collect();
        assert_eq!(fixture.ledger.reserved_count(), 0);

        let names: Vec<&str> = released.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["bd-1", "bd-2"]);
        assert!(released.iter().all(|d| d.reservation_owner().is_none()));
    }

    #[tokio::test]
    async fn test_released_devices_are_picked_up_by_next_set() {
        let mut fixture = Fixture::new();
        fixture.device("bd-1", "n1");
        fixture.device("bd-2", "n1");

        let request = fixture.request(None);
        let reserved = StorageSetReconciler
            .reconcile(&request, &fixture.ctx)
            .await
            .unwrap();

        // the first set goes away while the devices carry its reservation
        let mut finalizing = request.clone();
        finalizing.attachments = Attachments::default();
        for raw in attachments_of_kind(reserved, "BlockDevice") {
            let device: BlockDevice = serde_json::from_value(raw).unwrap();
            finalizing.attachments.insert(&device).unwrap();
        }
        finalizing.finalizing = true;
        let released = StorageSetReconciler
            .finalize(&finalizing, &fixture.ctx)
            .await
            .unwrap();

        // a replacement set on the same node sees only the released copies
        let mut replacement = fixture.request(None);
        let mut watch: CStorClusterStorageSet = replacement.watch_as().unwrap();
        watch.metadata.uid = Some("next-set-uid".into());
        replacement.watch = to_attachment(&watch).unwrap();
        replacement.attachments = fixture.attachments.clone();
        for raw in &released {
            let device: BlockDevice = serde_json::from_value(raw.clone()).unwrap();
            replacement.attachments.insert(&device).unwrap();
        }

        let reconciled = StorageSetReconciler
            .reconcile(&replacement, &fixture.ctx)
            .await
            .unwrap();
        let devices: Vec<BlockDevice> = attachments_of_kind(reconciled, "BlockDevice")
            .into_iter()
            .map(|raw| serde_json::from_value(raw).unwrap())
            .collect();
        assert_eq!(devices.len(), 2);
        assert!(devices
            .iter()
            .all(|d| d.reservation_owner() == Some("next-set-uid")));
    }
}
