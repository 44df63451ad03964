//! CStor Pool Auto - declarative cStor pool planning
//!
//! Turns one cluster-wide pool intent into a CStorPoolCluster, one hook at a
//! time. An external orchestrator watches the resources and posts sync
//! requests; every hook answers with the children that should exist.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   nodes    ┌──────────────────────┐
//! │  CStorClusterConfig  ├───────────►│   CStorClusterPlan   │
//! └──────────────────────┘ selection  └──────────┬───────────┘
//!                                                │ one per node
//!                                     ┌──────────▼───────────┐
//!                     BlockDevices ──►│ CStorClusterStorageSet│
//!                     (reserved)      └──────────┬───────────┘
//!                                                │ readiness gates
//!                                     ┌──────────▼───────────┐
//!                                     │   CStorPoolCluster   │
//!                                     └──────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`planner`]: pure planning core (merge, selector, defaults, nodes,
//!   storage sets, devices, pool cluster)
//! - [`controlplane`]: hook server, reconcilers and reservation ledger
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: RAID and capacity vocabulary, ports
//! - [`error`]: Error types and handling

pub mod controlplane;
pub mod crd;
pub mod domain;
pub mod error;
pub mod planner;

// Re-export commonly used types
pub use controlplane::{
    ApiServer, ApiServerConfig, HookContext, HookRequest, HookResponse,
    InMemoryReservationLedger, Metrics, OperatorConfig,
};

pub use crd::{
    BlockDevice, CStorClusterConfig, CStorClusterConfigSpec, CStorClusterPlan,
    CStorClusterPlanSpec, CStorClusterStorageSet, CStorClusterStorageSetSpec, CStorPoolCluster,
    CStorPoolClusterSpec, ClusterStatus,
};

pub use domain::{ClaimRequest, RaidType, Reservation, ReservationLedger};

pub use error::{Error, ErrorAction, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
