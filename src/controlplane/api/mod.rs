//! API Module
//!
//! HTTP surface of the operator: sync hooks and health probes.

pub mod server;
pub mod rest;

pub use server::*;
pub use rest::*;
