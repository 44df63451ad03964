//! Selector Engine
//!
//! Evaluates declarative match predicates against a resource. A selector is
//! a disjunction of terms; every requirement inside one term must hold.
//! Resources are evaluated through their serialized JSON form so that any
//! dot separated field path can be addressed.

use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// Selector Types
// =============================================================================

/// Operator for label, annotation and field requirements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// Operator for multi valued fields such as finalizer lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SliceOperator {
    Equals,
    NotEquals,
    In,
    NotIn,
}

/// A single key/operator/values requirement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Requirement against a list valued field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SliceRequirement {
    /// Dot separated path to the list
    pub key: String,
    pub operator: SliceOperator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// One term of a selector; all requirements are ANDed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SelectorTerm {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_label_expressions: Vec<Requirement>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_annotation_expressions: Vec<Requirement>,
    /// Exact values keyed by dot separated field path
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_fields: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_field_expressions: Vec<Requirement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_slice: Vec<SliceRequirement>,
}

/// Disjunction of selector terms. No terms selects everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Selector(pub Vec<SelectorTerm>);

// =============================================================================
// Validation
// =============================================================================

impl Requirement {
    pub fn new(key: impl Into<String>, operator: Operator, values: &[&str]) -> Self {
        Self {
            key: key.into(),
            operator,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(Error::SelectorInvalid("requirement with empty key".into()));
        }
        match self.operator {
            Operator::In | Operator::NotIn if self.values.is_empty() => {
                Err(Error::SelectorInvalid(format!(
                    "{:?} on {:?} requires at least one value",
                    self.operator, self.key
                )))
            }
            Operator::Exists | Operator::DoesNotExist if !self.values.is_empty() => {
                Err(Error::SelectorInvalid(format!(
                    "{:?} on {:?} takes no values",
                    self.operator, self.key
                )))
            }
            _ => Ok(()),
        }
    }

    /// `actual` is `None` when the key is absent on the target
    fn matches(&self, actual: Option<&str>) -> bool {
        match self.operator {
            Operator::Exists => actual.is_some(),
            Operator::DoesNotExist => actual.is_none(),
            Operator::In => actual
                .map(|value| self.values.iter().any(|v| v == value))
                .unwrap_or(false),
            Operator::NotIn => actual
                .map(|value| !self.values.iter().any(|v| v == value))
                .unwrap_or(true),
        }
    }
}

impl SliceRequirement {
    pub fn new(key: impl Into<String>, operator: SliceOperator, values: &[&str]) -> Self {
        Self {
            key: key.into(),
            operator,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(Error::SelectorInvalid("slice requirement with empty key".into()));
        }
        match self.operator {
            SliceOperator::In | SliceOperator::NotIn if self.values.is_empty() => {
                Err(Error::SelectorInvalid(format!(
                    "{:?} on {:?} requires at least one value",
                    self.operator, self.key
                )))
            }
            _ => Ok(()),
        }
    }

    fn matches(&self, actual: &BTreeSet<String>) -> bool {
        let wanted: BTreeSet<&str> = self.values.iter().map(String::as_str).collect();
        let contains_all = wanted.iter().all(|v| actual.contains(*v));
        match self.operator {
            SliceOperator::Equals => {
                contains_all && actual.len() == wanted.len()
            }
            SliceOperator::NotEquals => !(contains_all && actual.len() == wanted.len()),
            SliceOperator::In => contains_all,
            SliceOperator::NotIn => !wanted.iter().any(|v| actual.contains(*v)),
        }
    }
}

impl SelectorTerm {
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty()
            && self.match_label_expressions.is_empty()
            && self.match_annotations.is_empty()
            && self.match_annotation_expressions.is_empty()
            && self.match_fields.is_empty()
            && self.match_field_expressions.is_empty()
            && self.match_slice.is_empty()
    }

    fn validate(&self) -> Result<()> {
        self.match_label_expressions
            .iter()
            .chain(&self.match_annotation_expressions)
            .chain(&self.match_field_expressions)
            .try_for_each(Requirement::validate)?;
        self.match_slice.iter().try_for_each(SliceRequirement::validate)
    }

    fn matches(&self, target: &Value) -> bool {
        let labels = target.pointer("/metadata/labels");
        let annotations = target.pointer("/metadata/annotations");

        let map_lookup = |map: Option<&Value>, key: &str| -> Option<String> {
            map.and_then(|m| m.get(key)).and_then(scalar_to_string)
        };

        let exact = |map: Option<&Value>, expected: &BTreeMap<String, String>| {
            expected
                .iter()
                .all(|(k, v)| map_lookup(map, k).as_deref() == Some(v.as_str()))
        };

        if !exact(labels, &self.match_labels) || !exact(annotations, &self.match_annotations) {
            return false;
        }

        let labels_ok = self
            .match_label_expressions
            .iter()
            .all(|r| r.matches(map_lookup(labels, &r.key).as_deref()));
        let annotations_ok = self
            .match_annotation_expressions
            .iter()
            .all(|r| r.matches(map_lookup(annotations, &r.key).as_deref()));
        if !labels_ok || !annotations_ok {
            return false;
        }

        let fields_ok = self.match_fields.iter().all(|(path, expected)| {
            field(target, path).and_then(scalar_to_string).as_deref() == Some(expected.as_str())
        });
        let field_exprs_ok = self.match_field_expressions.iter().all(|r| {
            r.matches(field(target, &r.key).and_then(scalar_to_string).as_deref())
        });
        if !fields_ok || !field_exprs_ok {
            return false;
        }

        self.match_slice
            .iter()
            .all(|r| r.matches(&slice_values(field(target, &r.key))))
    }
}

// =============================================================================
// Evaluation
// =============================================================================

impl Selector {
    pub fn new(terms: Vec<SelectorTerm>) -> Self {
        Self(terms)
    }

    /// True when every term is empty, i.e. the selector matches anything
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(SelectorTerm::is_empty)
    }

    /// Reject malformed requirements before any evaluation
    pub fn validate(&self) -> Result<()> {
        self.0.iter().try_for_each(SelectorTerm::validate)
    }

    /// Evaluate against a JSON document
    pub fn matches(&self, target: Option<&Value>) -> Result<bool> {
        self.validate()?;

        if self.0.is_empty() {
            return Ok(true);
        }

        let target = match target {
            Some(Value::Null) | None if self.is_empty() => return Ok(true),
            Some(Value::Null) | None => return Err(Error::NilSelectorTarget),
            Some(value) => value,
        };

        Ok(self
            .0
            .iter()
            .any(|term| term.is_empty() || term.matches(target)))
    }

    /// Evaluate against a typed resource through its serialized form
    pub fn matches_resource<T: Serialize>(&self, target: Option<&T>) -> Result<bool> {
        let value = target.map(serde_json::to_value).transpose()?;
        self.matches(value.as_ref())
    }
}

/// Walk a dot separated path
fn field<'a>(target: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(target, |current, segment| current.get(segment))
        .filter(|value| !value.is_null())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn slice_values(value: Option<&Value>) -> BTreeSet<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_to_string).collect(),
        Some(other) => scalar_to_string(other).into_iter().collect(),
        None => BTreeSet::new(),
    }
}
