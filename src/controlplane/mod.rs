//! Control Plane Module
//!
//! The hook server shell around the planner: request and response shapes,
//! one reconciler per hook, the reservation ledger, metrics and operator
//! configuration.

pub mod api;
pub mod config;
pub mod hook;
pub mod metrics;
pub mod reconcile;
pub mod reservation;

pub use api::*;
pub use config::OperatorConfig;
pub use hook::{Attachments, HookRequest, HookResponse};
pub use metrics::{Metrics, Outcome};
pub use reconcile::{sync, HookContext, Reconciled, Reconciler};
pub use reservation::InMemoryReservationLedger;
