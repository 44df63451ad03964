//! Domain Ports - trait definitions for state the planner does not own
//!
//! The planning core is pure; anything that has to be agreed on between
//! concurrently reconciling objects goes through one of these ports.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// =============================================================================
// Reservation Types
// =============================================================================

/// Request to reserve a block device for a storage set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRequest {
    /// Block device name
    pub device: String,
    /// UID of the storage set that wants the device
    pub owner: String,
    /// Owner the caller observed on the device, `None` when it looked free
    pub expected_owner: Option<String>,
    /// Resource version of the device the caller observed
    pub observed_version: Option<String>,
}

impl ClaimRequest {
    pub fn new(device: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            owner: owner.into(),
            expected_owner: None,
            observed_version: None,
        }
    }

    pub fn expecting(mut self, owner: Option<String>) -> Self {
        self.expected_owner = owner;
        self
    }

    pub fn at_version(mut self, version: Option<String>) -> Self {
        self.observed_version = version;
        self
    }
}

/// A granted reservation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub device: String,
    pub owner: String,
    /// Monotonic ledger generation for this device
    pub generation: u64,
    pub observed_version: Option<String>,
}

// =============================================================================
// Reservation Ledger Port
// =============================================================================

/// Compare-and-swap store of block device reservations.
///
/// `claim` only succeeds when the device's current owner is either the
/// caller's `expected_owner` or the requesting owner itself. Repeating a
/// granted claim is a no-op that returns the existing reservation.
///
/// A grant records the `observed_version` it was made from. Taking over a
/// held device with a claim carrying that same version fails with
/// `StaleReservation`, as the claim was planned before the grant.
#[async_trait]
pub trait ReservationLedger: Send + Sync {
    /// Reserve a device, failing with `ReservationConflict` or
    /// `StaleReservation` on a lost race
    async fn claim(&self, request: ClaimRequest) -> Result<Reservation>;

    /// Drop a reservation held by `owner`; releasing someone else's is a no-op
    async fn release(&self, device: &str, owner: &str) -> Result<()>;

    /// Current holder of a device, if any
    async fn owner_of(&self, device: &str) -> Result<Option<Reservation>>;
}
