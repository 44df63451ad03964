//! Defaulting Evaluator
//!
//! Resolves a partially specified cluster config against the live node
//! inventory. Steps run in a fixed order and the first failure wins.
//! Resolution is idempotent: feeding a resolved config back in, with the same
//! inventory, yields the same values.

use crate::crd::{CStorClusterConfigSpec, DiskConfigIntent, ExternalProvision, PoolConfigIntent};
use crate::domain::{parse_quantity, RaidType, DEFAULT_MIN_DISK_CAPACITY};
use crate::error::{Error, Result};
use crate::planner::selector::Selector;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Pool count used when the config leaves it unset and enough nodes exist
pub const DEFAULT_MIN_POOL_COUNT: i64 = 3;

/// Extra pools allowed above the minimum when no maximum is given
const DEFAULT_MAX_POOL_HEADROOM: i64 = 2;

// =============================================================================
// Inputs
// =============================================================================

/// Operator wide fallbacks, overridable through the operator config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlannerDefaults {
    pub min_pool_count: i64,
    pub min_disk_capacity: String,
}

impl Default for PlannerDefaults {
    fn default() -> Self {
        Self {
            min_pool_count: DEFAULT_MIN_POOL_COUNT,
            min_disk_capacity: DEFAULT_MIN_DISK_CAPACITY.to_string(),
        }
    }
}

/// What the cluster currently offers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeInventory {
    /// Every node known to the cluster
    pub available: usize,
    /// Nodes passing the config's node selector
    pub eligible: usize,
}

// =============================================================================
// Output
// =============================================================================

/// Fully resolved cluster intent
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedIntent {
    pub min_pool_count: usize,
    pub max_pool_count: usize,
    pub raid_type: RaidType,
    pub min_disk_count: usize,
    pub min_disk_capacity: String,
    pub min_disk_capacity_bytes: u64,
    pub external_provision: Option<ExternalProvision>,
    pub allowed_nodes: Selector,
    pub local_disk_selector: Selector,
}

impl ResolvedIntent {
    /// Spec with every default written out
    pub fn to_spec(&self) -> CStorClusterConfigSpec {
        CStorClusterConfigSpec {
            allowed_nodes: self.allowed_nodes.clone(),
            min_pool_count: Some(self.min_pool_count as i64),
            max_pool_count: Some(self.max_pool_count as i64),
            pool_config: PoolConfigIntent {
                raid_type: Some(self.raid_type.to_string()),
            },
            disk_config: DiskConfigIntent {
                min_count: Some(self.min_disk_count as i64),
                min_capacity: Some(self.min_disk_capacity.clone()),
                external_provision: self.external_provision.clone(),
                local_disk_selector: self.local_disk_selector.clone(),
            },
        }
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// Resolve `raw` against `inventory`
pub fn resolve(
    raw: &CStorClusterConfigSpec,
    inventory: NodeInventory,
    defaults: &PlannerDefaults,
) -> Result<ResolvedIntent> {
    let disk = &raw.disk_config;

    if let Some(external) = &disk.external_provision {
        if !external.is_complete() {
            return Err(Error::Validation(
                "externalProvision needs both csiAttacherName and storageClassName".into(),
            ));
        }
    }

    let min_pool_count = match raw.min_pool_count {
        None => {
            let count = defaults
                .min_pool_count
                .min(inventory.available as i64)
                .min(inventory.eligible as i64);
            if count <= 0 {
                return Err(Error::Validation(
                    "no eligible nodes to derive minPoolCount from".into(),
                ));
            }
            debug!(count, ?inventory, "defaulted minPoolCount");
            count
        }
        Some(count) if count < 0 => {
            return Err(Error::Validation(format!(
                "minPoolCount must not be negative, got {}",
                count
            )))
        }
        Some(count) => count,
    };

    let max_pool_count = match raw.max_pool_count {
        None => min_pool_count + DEFAULT_MAX_POOL_HEADROOM,
        Some(count) if count < min_pool_count => {
            return Err(Error::Validation(format!(
                "maxPoolCount {} is less than minPoolCount {}",
                count, min_pool_count
            )))
        }
        Some(count) => count,
    };

    let raid_type = match raw.pool_config.raid_type.as_deref() {
        None | Some("") => RaidType::default(),
        Some(value) => value.parse()?,
    };

    let min_disk_count = match disk.min_count {
        None => raid_type.default_min_disk_count(),
        Some(count) if count < 0 => {
            return Err(Error::Validation(format!(
                "diskConfig.minCount must not be negative, got {}",
                count
            )))
        }
        Some(count) => count,
    };

    let min_disk_capacity = disk
        .min_capacity
        .clone()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| defaults.min_disk_capacity.clone());
    let min_disk_capacity_bytes = parse_quantity(&min_disk_capacity)?;
    if min_disk_capacity_bytes == 0 {
        return Err(Error::Validation(format!(
            "diskConfig.minCapacity must be positive, got {}",
            min_disk_capacity
        )));
    }

    raw.allowed_nodes.validate()?;
    disk.local_disk_selector.validate()?;

    Ok(ResolvedIntent {
        min_pool_count: min_pool_count as usize,
        max_pool_count: max_pool_count as usize,
        raid_type,
        min_disk_count: min_disk_count as usize,
        min_disk_capacity,
        min_disk_capacity_bytes,
        external_provision: disk.external_provision.clone(),
        allowed_nodes: raw.allowed_nodes.clone(),
        local_disk_selector: disk.local_disk_selector.clone(),
    })
}
