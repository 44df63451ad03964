//! Operator configuration
//!
//! Optional YAML file with the knobs of the hook server. Every field has a
//! default, so an empty file and no file at all behave the same.

use crate::domain::{parse_quantity, DEFAULT_MIN_DISK_CAPACITY};
use crate::error::{Error, Result};
use crate::planner::defaults::{PlannerDefaults, DEFAULT_MIN_POOL_COUNT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Re-check delay used when the pipeline is not ready yet
pub const DEFAULT_RESYNC_AFTER_SECONDS: u64 = 3;

/// Largest hook request body accepted
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Configuration of the hook server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    /// Seconds before a not ready reconciliation is retried
    pub resync_after_seconds: u64,
    /// Pool count used when a config leaves it unset
    pub default_min_pool_count: i64,
    /// Disk capacity used when a config leaves it unset
    pub default_min_disk_capacity: String,
    pub max_body_bytes: usize,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            resync_after_seconds: DEFAULT_RESYNC_AFTER_SECONDS,
            default_min_pool_count: DEFAULT_MIN_POOL_COUNT,
            default_min_disk_capacity: DEFAULT_MIN_DISK_CAPACITY.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl OperatorConfig {
    /// Load and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&raw)?;
        info!(path = %path.display(), "loaded operator config");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.resync_after_seconds == 0 {
            return Err(Error::Configuration(
                "resyncAfterSeconds must be positive".into(),
            ));
        }
        if self.default_min_pool_count <= 0 {
            return Err(Error::Configuration(
                "defaultMinPoolCount must be positive".into(),
            ));
        }
        match parse_quantity(&self.default_min_disk_capacity) {
            Ok(bytes) if bytes > 0 => {}
            Ok(_) => {
                return Err(Error::Configuration(
                    "defaultMinDiskCapacity must be positive".into(),
                ))
            }
            Err(e) => {
                return Err(Error::Configuration(format!(
                    "defaultMinDiskCapacity: {}",
                    e
                )))
            }
        }
        if self.max_body_bytes == 0 {
            return Err(Error::Configuration("maxBodyBytes must be positive".into()));
        }
        Ok(())
    }

    /// Fallbacks handed to the defaulting evaluator
    pub fn planner_defaults(&self) -> PlannerDefaults {
        PlannerDefaults {
            min_pool_count: self.default_min_pool_count,
            min_disk_capacity: self.default_min_disk_capacity.clone(),
        }
    }
}
