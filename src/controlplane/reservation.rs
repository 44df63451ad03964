//! In-memory reservation ledger
//!
//! Process local compare-and-swap store for block device reservations,
//! backed by DashMap so concurrent reconciliations of different storage sets
//! can race on the same device and exactly one of them wins.
//!
//! A device the ledger has never seen, or holds as free, is granted to the
//! caller; this lets a restarted operator pick up reservations recorded on
//! the devices themselves.
//!
//! Every grant remembers the device resourceVersion it was made from. Taking
//! over a held device needs an observation newer than that grant; a handover
//! claim carrying the same version is refused. Free devices are granted at
//! any version, since the previous holder's writes may never have landed.

use crate::domain::ports::{ClaimRequest, Reservation, ReservationLedger};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
struct LedgerEntry {
    owner: Option<String>,
    generation: u64,
    observed_version: Option<String>,
}

impl LedgerEntry {
    fn reservation(&self, device: &str) -> Option<Reservation> {
        self.owner.as_ref().map(|owner| Reservation {
            device: device.to_string(),
            owner: owner.clone(),
            generation: self.generation,
            observed_version: self.observed_version.clone(),
        })
    }
}

/// Reservation ledger kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryReservationLedger {
    entries: DashMap<String, LedgerEntry>,
}

impl InMemoryReservationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of devices currently reserved
    pub fn reserved_count(&self) -> usize {
        self.entries.iter().filter(|e| e.owner.is_some()).count()
    }
}

#[async_trait]
impl ReservationLedger for InMemoryReservationLedger {
    async fn claim(&self, request: ClaimRequest) -> Result<Reservation> {
        let grant = |entry: &mut LedgerEntry| {
            entry.owner = Some(request.owner.clone());
            entry.generation += 1;
            entry.observed_version = request.observed_version.clone();
        };

        match self.entries.entry(request.device.clone()) {
            Entry::Vacant(vacant) => {
                let mut entry = LedgerEntry::default();
                grant(&mut entry);
                debug!(device = %request.device, owner = %request.owner, "device reserved");
                let reservation = entry.reservation(&request.device);
                vacant.insert(entry);
                reservation.ok_or_else(|| Error::Internal("reservation vanished".into()))
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                match entry.owner.clone() {
                    Some(current) if current == request.owner => {}
                    Some(current) if Some(&current) != request.expected_owner.as_ref() => {
                        warn!(
                            device = %request.device,
                            owner = %current,
                            requested_by = %request.owner,
                            "lost reservation race"
                        );
                        return Err(Error::ReservationConflict {
                            device: request.device,
                            owner: current,
                        });
                    }
                    Some(_)
                        if request.observed_version.is_some()
                            && request.observed_version == entry.observed_version =>
                    {
                        warn!(
                            device = %request.device,
                            version = ?request.observed_version,
                            requested_by = %request.owner,
                            "claim planned from a stale device version"
                        );
                        return Err(Error::StaleReservation {
                            device: request.device,
                            version: request.observed_version.unwrap_or_default(),
                        });
                    }
                    _ => {
                        grant(&mut *entry);
                        debug!(device = %request.device, owner = %request.owner, "device reserved");
                    }
                }
                entry
                    .reservation(&request.device)
                    .ok_or_else(|| Error::Internal("reservation vanished".into()))
            }
        }
    }

    async fn release(&self, device: &str, owner: &str) -> Result<()> {
        if let Some(mut entry) = self.entries.get_mut(device) {
            if entry.owner.as_deref() == Some(owner) {
                entry.owner = None;
                entry.generation += 1;
                debug!(device = %device, owner = %owner, "device released");
            }
        }
        Ok(())
    }

    async fn owner_of(&self, device: &str) -> Result<Option<Reservation>> {
        Ok(self
            .entries
            .get(device)
            .and_then(|entry| entry.reservation(device)))
    }
}
