//! Error types for the CStor pool planner
//!
//! Provides structured error types for every planning stage and for the
//! hook shell that drives them.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unsupported raid type: {0}")]
    InvalidRaidType(String),

    #[error(
        "Invalid disk distribution on node {node}: {device_count} devices is not a multiple of raid group size {group_size}"
    )]
    InvalidDiskDistribution {
        node: String,
        device_count: usize,
        group_size: usize,
    },

    #[error("Invalid selector: {0}")]
    SelectorInvalid(String),

    #[error("Selector requirements cannot be evaluated against a nil target")]
    NilSelectorTarget,

    // =========================================================================
    // Correlation Errors
    // =========================================================================
    #[error("Required attachment missing: {kind}")]
    MissingAttachment { kind: String },

    #[error("Failed to decode {kind}: {reason}")]
    Decode { kind: String, reason: String },

    // =========================================================================
    // Reservation Errors
    // =========================================================================
    #[error("Block device {device} is reserved by {owner}")]
    ReservationConflict { device: String, owner: String },

    #[error("Device {device} changed since version {version} was observed")]
    StaleReservation { device: String, version: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Capacity parse error: {0}")]
    CapacityParse(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action the hook shell takes when a reconciliation fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Record an error condition and skip this round without a resync
    ReportAndSkip,
    /// Skip this round without touching status
    SkipSilently,
    /// Skip this round and come back after the configured resync period
    Resync,
    /// Skip this round and ask the orchestrator to come back later
    RetryAfter(Duration),
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // A sibling that is expected to show up shortly
            Error::MissingAttachment { .. } => ErrorAction::SkipSilently,

            // Lost a race for a device, the next round sees the winner
            Error::ReservationConflict { .. } | Error::StaleReservation { .. } => {
                ErrorAction::Resync
            }

            Error::Internal(_) | Error::Io(_) => ErrorAction::RetryAfter(Duration::from_secs(10)),

            // Malformed intent and unsafe plans need a human
            Error::Configuration(_)
            | Error::Validation(_)
            | Error::InvalidRaidType(_)
            | Error::InvalidDiskDistribution { .. }
            | Error::SelectorInvalid(_)
            | Error::NilSelectorTarget
            | Error::Decode { .. }
            | Error::CapacityParse(_)
            | Error::JsonParse(_)
            | Error::YamlParse(_) => ErrorAction::ReportAndSkip,
        }
    }

    /// Short machine readable reason used in status conditions
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Internal(_) | Error::Io(_) => "InternalError",
            Error::Configuration(_) => "InvalidConfiguration",
            Error::Validation(_) | Error::CapacityParse(_) => "ValidationFailed",
            Error::InvalidRaidType(_) => "InvalidRaidType",
            Error::InvalidDiskDistribution { .. } => "InvalidDiskDistribution",
            Error::SelectorInvalid(_) | Error::NilSelectorTarget => "InvalidSelector",
            Error::MissingAttachment { .. } => "MissingAttachment",
            Error::Decode { .. } | Error::JsonParse(_) | Error::YamlParse(_) => "DecodeFailed",
            Error::ReservationConflict { .. } => "ReservationConflict",
            Error::StaleReservation { .. } => "StaleReservation",
        }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
