//! Device Selection & Distribution Planner
//!
//! Filters observed block devices down to the ones a storage set may use,
//! decides which of them it reserves, and cuts a node's final device list
//! into raid groups.

use crate::crd::{BlockDevice, ClaimState};
use crate::domain::RaidType;
use crate::error::{Error, Result};
use crate::planner::merge::merge;
use crate::planner::selector::Selector;
use std::collections::BTreeSet;
use tracing::debug;

// =============================================================================
// Eligibility
// =============================================================================

/// Devices that pass `selector`, are large enough, active, and free or
/// already held by `owner`
pub fn select_eligible<'a>(
    candidates: &'a [BlockDevice],
    selector: &Selector,
    min_capacity_bytes: u64,
    owner: &str,
) -> Result<Vec<&'a BlockDevice>> {
    let mut eligible = Vec::new();

    for device in candidates {
        if !selector.matches_resource(Some(device))? {
            continue;
        }
        if is_eligible(device, min_capacity_bytes, owner) {
            eligible.push(device);
        } else {
            debug!(device = %device.name(), "block device not eligible");
        }
    }

    Ok(eligible)
}

fn is_eligible(device: &BlockDevice, min_capacity_bytes: u64, owner: &str) -> bool {
    let reserved_by = device.reservation_owner();
    let free_or_mine = reserved_by.map(|uid| uid == owner).unwrap_or(true);

    let claim_ok = match device.claim_state() {
        ClaimState::Unclaimed => true,
        ClaimState::Claimed => reserved_by == Some(owner),
        ClaimState::Released => false,
    };

    device.is_active() && claim_ok && free_or_mine && device.capacity_bytes() >= min_capacity_bytes
}

// =============================================================================
// Reservation
// =============================================================================

/// Reservation changes a storage set should make this round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationPlan {
    /// Devices the storage set holds after this round, in slot order
    pub reserved: Vec<String>,
    /// Newly reserved devices, a subset of `reserved`
    pub acquire: Vec<String>,
    /// Previously held devices to give back
    pub release: Vec<String>,
    /// Disks still missing to reach the desired count
    pub shortfall: usize,
}

/// Inputs for planning one storage set's reservations
#[derive(Debug, Clone, Copy)]
pub struct ReservationRequest<'a> {
    pub owner: &'a str,
    pub node_name: &'a str,
    pub selector: &'a Selector,
    pub min_capacity_bytes: u64,
    pub desired_count: usize,
}

/// Decide which devices `request.owner` reserves on its node.
///
/// Devices already held and still eligible are kept first; free devices are
/// added in name order until the desired count is reached. Held devices that
/// became ineligible, exceed the count, or sit on another node are released.
pub fn plan_reservations(
    devices: &[BlockDevice],
    request: ReservationRequest<'_>,
) -> Result<ReservationPlan> {
    let mut held: Vec<String> = devices
        .iter()
        .filter(|d| d.reservation_owner() == Some(request.owner))
        .map(|d| d.name().to_string())
        .collect();
    held.sort();

    let on_node: Vec<BlockDevice> = devices
        .iter()
        .filter(|d| d.host_label() == Some(request.node_name))
        .cloned()
        .collect();
    let mut eligible: Vec<String> = select_eligible(
        &on_node,
        request.selector,
        request.min_capacity_bytes,
        request.owner,
    )?
    .into_iter()
    .map(|d| d.name().to_string())
    .collect();
    eligible.sort();

    let eligible_set: BTreeSet<&str> = eligible.iter().map(String::as_str).collect();
    let mut chosen: Vec<String> = held
        .iter()
        .filter(|name| eligible_set.contains(name.as_str()))
        .take(request.desired_count)
        .cloned()
        .collect();
    for name in &eligible {
        if chosen.len() >= request.desired_count {
            break;
        }
        if !chosen.contains(name) {
            chosen.push(name.clone());
        }
    }

    let reserved = merge(&held, &chosen);
    let acquire = reserved
        .iter()
        .filter(|name| !held.contains(*name))
        .cloned()
        .collect();
    let release = held
        .iter()
        .filter(|name| !reserved.contains(*name))
        .cloned()
        .collect();
    let shortfall = request.desired_count.saturating_sub(reserved.len());

    Ok(ReservationPlan {
        reserved,
        acquire,
        release,
        shortfall,
    })
}

// =============================================================================
// Distribution
// =============================================================================

/// Ordered devices forming one raid group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaidGroup {
    pub raid_type: RaidType,
    pub devices: Vec<String>,
}

/// Final device order for a node: the observed pool layout merged with the
/// devices the node should now contribute
pub fn final_device_list(observed_order: &[String], desired: &[String]) -> Vec<String> {
    merge(observed_order, desired)
}

/// Cut `devices` into consecutive raid groups of the layout's size.
///
/// A remainder is an error; a pool with a partial raid group is never built.
pub fn distribute(node: &str, devices: &[String], raid_type: RaidType) -> Result<Vec<RaidGroup>> {
    let group_size = raid_type.group_size();
    if devices.len() % group_size != 0 {
        return Err(Error::InvalidDiskDistribution {
            node: node.to_string(),
            device_count: devices.len(),
            group_size,
        });
    }

    Ok(devices
        .chunks(group_size)
        .map(|chunk| RaidGroup {
            raid_type,
            devices: chunk.to_vec(),
        })
        .collect())
}

// =============================================================================
// Readiness
// =============================================================================

/// Every planned node has a storage set
pub fn is_ready_by_node_count(desired_nodes: usize, observed_storage_sets: usize) -> bool {
    desired_nodes == observed_storage_sets
}

/// Every storage set sees at least as many devices as it asked for.
///
/// Takes `(desired disk count, observed device count)` per storage set.
pub fn is_ready_by_node_disk_count(counts: impl IntoIterator<Item = (usize, usize)>) -> bool {
    counts
        .into_iter()
        .all(|(desired, observed)| desired <= observed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{BlockDeviceSpec, BlockDeviceStatus, DeviceState, HOSTNAME_LABEL};
    use crate::planner::selector::SelectorTerm;
    use assert_matches::assert_matches;

    const GI: u64 = 1 << 30;

    fn device(name: &str, node: &str, capacity: u64) -> BlockDevice {
        let mut spec = BlockDeviceSpec::default();
        spec.capacity.storage = capacity;
        let mut bd = BlockDevice::new(name, spec);
        bd.metadata.labels = Some([(HOSTNAME_LABEL.to_string(), node.to_string())].into());
        bd.status = Some(BlockDeviceStatus {
            claim_state: ClaimState::Unclaimed,
            state: DeviceState::Active,
        });
        bd
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_eligible_rules() {
        let mut inactive = device("bd-inactive", "n1", 200 * GI);
        inactive.status.as_mut().unwrap().state = DeviceState::Inactive;
        let mut foreign = device("bd-foreign", "n1", 200 * GI);
        foreign.reserve_for("other");
        let mut mine_claimed = device("bd-mine", "n1", 200 * GI);
        mine_claimed.reserve_for("me");
        mine_claimed.status.as_mut().unwrap().claim_state = ClaimState::Claimed;
        let mut claimed_elsewhere = device("bd-claimed", "n1", 200 * GI);
        claimed_elsewhere.status.as_mut().unwrap().claim_state = ClaimState::Claimed;

        let candidates = vec![
            device("bd-ok", "n1", 200 * GI),
            device("bd-small", "n1", 50 * GI),
            inactive,
            foreign,
            mine_claimed,
            claimed_elsewhere,
        ];

        let eligible = select_eligible(&candidates, &Selector::default(), 100 * GI, "me").unwrap();
        let eligible: Vec<&str> = eligible.iter().map(|d| d.name()).collect();
        assert_eq!(eligible, vec!["bd-ok", "bd-mine"]);
    }

    #[test]
    fn test_select_eligible_applies_selector() {
        let candidates = vec![device("bd-1", "n1", 200 * GI), device("bd-2", "n2", 200 * GI)];
        let selector = Selector::new(vec![SelectorTerm {
            match_labels: [(HOSTNAME_LABEL.to_string(), "n2".to_string())].into(),
            ..Default::default()
        }]);
        let eligible = select_eligible(&candidates, &selector, 0, "me").unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].name(), "bd-2");
    }

    #[test]
    fn test_distribute_mirror() {
        let groups = distribute("node-001", &names(&["bd-1", "bd-2", "bd-3", "bd-4"]), RaidType::Mirror)
            .unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].devices, names(&["bd-1", "bd-2"]));
        assert_eq!(groups[1].raid_type, RaidType::Mirror);
    }

    #[test]
    fn test_distribute_rejects_partial_group() {
        let devices = names(&["a", "b", "c", "d", "e", "f", "g"]);
        assert_matches!(
            distribute("node-001", &devices, RaidType::Raidz),
            Err(Error::InvalidDiskDistribution { device_count: 7, group_size: 3, .. })
        );
        assert_matches!(
            distribute("node-001", &names(&["bd-1"]), RaidType::Mirror),
            Err(Error::InvalidDiskDistribution { .. })
        );
    }

    #[test]
    fn test_final_device_list_replaces_dead_disk_in_place() {
        let observed = names(&["d1", "d2", "d3", "d4", "d5", "d6", "d7", "d8"]);
        let desired = names(&["d1", "d2", "d3", "d4", "d9", "d6", "d7", "d8"]);
        let merged = final_device_list(&observed, &desired);
        assert_eq!(merged, names(&["d1", "d2", "d3", "d4", "d9", "d6", "d7", "d8"]));

        // desired given in another order still keeps the observed layout
        let shuffled = names(&["d9", "d8", "d7", "d6", "d4", "d3", "d2", "d1"]);
        assert_eq!(final_device_list(&observed, &shuffled), merged);
    }

    #[test]
    fn test_readiness_gates() {
        assert!(is_ready_by_node_disk_count([(2, 3)]));
        assert!(!is_ready_by_node_disk_count([(2, 1)]));
        assert!(is_ready_by_node_disk_count([(2, 2), (0, 0)]));
        assert!(!is_ready_by_node_count(2, 1));
        assert!(is_ready_by_node_count(2, 2));
    }

    #[test]
    fn test_plan_reservations_keeps_held_and_fills_by_name() {
        let mut held = device("bd-c", "n1", 200 * GI);
        held.reserve_for("me");
        let mut elsewhere = device("bd-x", "n0", 200 * GI);
        elsewhere.reserve_for("me");
        let devices = vec![
            device("bd-b", "n1", 200 * GI),
            device("bd-a", "n1", 200 * GI),
            held,
            elsewhere,
            device("bd-z", "n2", 200 * GI),
        ];

        let plan = plan_reservations(
            &devices,
            ReservationRequest {
                owner: "me",
                node_name: "n1",
                selector: &Selector::default(),
                min_capacity_bytes: 100 * GI,
                desired_count: 2,
            },
        )
        .unwrap();

        // bd-x sat in the second held slot and bd-a takes it over
        assert_eq!(plan.reserved, names(&["bd-c", "bd-a"]));
        assert_eq!(plan.acquire, names(&["bd-a"]));
        assert_eq!(plan.release, names(&["bd-x"]));
        assert_eq!(plan.shortfall, 0);
    }

    #[test]
    fn test_plan_reservations_reports_shortfall() {
        let devices = vec![device("bd-a", "n1", 200 * GI)];
        let plan = plan_reservations(
            &devices,
            ReservationRequest {
                owner: "me",
                node_name: "n1",
                selector: &Selector::default(),
                min_capacity_bytes: 100 * GI,
                desired_count: 3,
            },
        )
        .unwrap();
        assert_eq!(plan.reserved, names(&["bd-a"]));
        assert_eq!(plan.shortfall, 2);
    }
}
