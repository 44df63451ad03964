//! Shared status model
//!
//! Every resource owned by the operator reports a phase plus a set of
//! conditions. Conditions are keyed by type and merged last-writer-wins per
//! key, so a writer only ever touches the conditions it owns.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type recorded when reconciliation fails. Hooks sharing a watched
/// resource prefix it with their own name so they never overwrite each other.
pub const CONDITION_RECONCILE_ERROR: &str = "ReconcileError";

/// Overall phase of an owned resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Phase {
    #[default]
    Online,
    Error,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Online => write!(f, "Online"),
            Phase::Error => write!(f, "Error"),
        }
    }
}

/// Truth value of a condition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// A status condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition, the merge key
    pub r#type: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub last_observed_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// Active error condition
    pub fn error(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            r#type: CONDITION_RECONCILE_ERROR.to_string(),
            status: ConditionStatus::True,
            reason: Some(reason.into()),
            message: Some(message.into()),
            last_observed_time: Some(Utc::now()),
        }
    }

    /// Cleared error condition
    pub fn resolved(r#type: impl Into<String>) -> Self {
        Self {
            r#type: r#type.into(),
            status: ConditionStatus::False,
            reason: None,
            message: None,
            last_observed_time: Some(Utc::now()),
        }
    }
}

/// Status reported by every owned resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl ClusterStatus {
    /// Merge conditions into this status.
    ///
    /// Keys not mentioned in `incoming` are left alone. For a shared key the
    /// later `last_observed_time` wins; ties go to the incoming condition.
    pub fn merge_conditions(&mut self, incoming: impl IntoIterator<Item = Condition>) {
        for condition in incoming {
            match self
                .conditions
                .iter_mut()
                .find(|c| c.r#type == condition.r#type)
            {
                Some(existing) if existing.last_observed_time > condition.last_observed_time => {}
                Some(existing) => *existing = condition,
                None => self.conditions.push(condition),
            }
        }
        self.phase = Some(self.derived_phase());
    }

    /// Error if any `*ReconcileError` condition is currently true
    pub fn derived_phase(&self) -> Phase {
        let failing = self
            .conditions
            .iter()
            .any(|c| {
                c.r#type.ends_with(CONDITION_RECONCILE_ERROR) && c.status == ConditionStatus::True
            });
        if failing {
            Phase::Error
        } else {
            Phase::Online
        }
    }

    pub fn condition(&self, r#type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }
}
