//! Planning core
//!
//! Pure functions from observed state to desired state. Nothing in here
//! performs I/O or keeps state between calls; every planner is built from the
//! inputs of a single reconciliation.
//!
//! - [`merge`]: order preserving list merge
//! - [`selector`]: label, annotation, field and slice matching
//! - [`defaults`]: cluster config defaulting
//! - [`nodes`]: node selection for a cluster plan
//! - [`storage_set`]: node to storage set planning
//! - [`device`]: device eligibility, reservation and raid distribution
//! - [`pool_cluster`]: pool cluster assembly

pub mod defaults;
pub mod device;
pub mod merge;
pub mod nodes;
pub mod pool_cluster;
pub mod selector;
pub mod storage_set;

pub use defaults::{resolve, NodeInventory, PlannerDefaults, ResolvedIntent};
pub use device::{
    distribute, final_device_list, is_ready_by_node_count, is_ready_by_node_disk_count,
    plan_reservations, select_eligible, RaidGroup, ReservationPlan, ReservationRequest,
};
pub use merge::{diff, is_diff, merge, Diff};
pub use nodes::{eligible_nodes, select_nodes};
pub use pool_cluster::{assemble, Assembly, AssemblyInput};
pub use selector::{Selector, SelectorTerm};
pub use storage_set::{NodeAction, PlanBuckets, StorageSetPlanner};
