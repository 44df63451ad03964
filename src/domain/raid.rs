//! RAID layouts
//!
//! Fixed lookup tables for the redundancy layouts a cStor pool supports.
//! Both tables are pure functions over the enum; nothing here is mutable.

use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Redundancy layout of a pool's raid groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RaidType {
    Stripe,
    Mirror,
    Raidz,
    Raidz2,
}

impl Default for RaidType {
    fn default() -> Self {
        RaidType::Mirror
    }
}

impl RaidType {
    /// All recognised layouts
    pub const ALL: [RaidType; 4] = [
        RaidType::Stripe,
        RaidType::Mirror,
        RaidType::Raidz,
        RaidType::Raidz2,
    ];

    /// Number of block devices that make up exactly one raid group
    pub const fn group_size(self) -> usize {
        match self {
            RaidType::Stripe => 1,
            RaidType::Mirror => 2,
            RaidType::Raidz => 3,
            RaidType::Raidz2 => 6,
        }
    }

    /// Disk count used when the cluster config leaves it unset
    pub const fn default_min_disk_count(self) -> i64 {
        match self {
            RaidType::Stripe => 1,
            RaidType::Mirror => 2,
            RaidType::Raidz => 3,
            RaidType::Raidz2 => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RaidType::Stripe => "stripe",
            RaidType::Mirror => "mirror",
            RaidType::Raidz => "raidz",
            RaidType::Raidz2 => "raidz2",
        }
    }
}

impl std::fmt::Display for RaidType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RaidType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        RaidType::ALL
            .into_iter()
            .find(|raid| raid.as_str() == s)
            .ok_or_else(|| Error::InvalidRaidType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_sizes() {
        assert_eq!(RaidType::Stripe.group_size(), 1);
        assert_eq!(RaidType::Mirror.group_size(), 2);
        assert_eq!(RaidType::Raidz.group_size(), 3);
        assert_eq!(RaidType::Raidz2.group_size(), 6);
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        assert_eq!("raidz2".parse::<RaidType>().unwrap(), RaidType::Raidz2);
        assert!("Mirror".parse::<RaidType>().is_err());
        assert!("raid10".parse::<RaidType>().is_err());
    }

    #[test]
    fn test_default_disk_count_fills_one_group() {
        for raid in RaidType::ALL {
            assert_eq!(raid.default_min_disk_count() as usize, raid.group_size());
        }
    }
}
