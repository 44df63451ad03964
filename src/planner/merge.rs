//! Equality/Merge Engine
//!
//! Order preserving diff and merge over two sequences of identifiers. Every
//! planning stage that re-derives a device or node list runs it through
//! [`merge`] so that entries surviving a replan keep their slot. Rewriting an
//! untouched raid group slot can trigger a resilver, so this is the one place
//! that keeps replanning churn-free.

use indexmap::IndexSet;
use std::hash::Hash;

/// Result of comparing an observed sequence against a desired one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff<T: Hash + Eq> {
    /// Present in both
    pub unchanged: IndexSet<T>,
    /// Desired but not observed, in desired order
    pub additions: Vec<T>,
    /// Observed but not desired, in observed order
    pub removals: Vec<T>,
}

impl<T: Hash + Eq> Diff<T> {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }
}

/// Exact match set comparison of two sequences
pub fn diff<T>(observed: &[T], desired: &[T]) -> Diff<T>
where
    T: Clone + Hash + Eq,
{
    let observed_set: IndexSet<&T> = observed.iter().collect();
    let desired_set: IndexSet<&T> = desired.iter().collect();

    Diff {
        unchanged: observed_set
            .iter()
            .filter(|item| desired_set.contains(*item))
            .map(|item| (*item).clone())
            .collect(),
        additions: desired_set
            .iter()
            .filter(|item| !observed_set.contains(*item))
            .map(|item| (*item).clone())
            .collect(),
        removals: observed_set
            .iter()
            .filter(|item| !desired_set.contains(*item))
            .map(|item| (*item).clone())
            .collect(),
    }
}

/// True iff the two sequences hold different sets of items.
///
/// Order and duplicates are ignored; comparison is case sensitive.
pub fn is_diff<T>(observed: &[T], desired: &[T]) -> bool
where
    T: Hash + Eq,
{
    let observed_set: IndexSet<&T> = observed.iter().collect();
    let desired_set: IndexSet<&T> = desired.iter().collect();
    observed_set.len() != desired_set.len() || !observed_set.iter().all(|i| desired_set.contains(i))
}

/// Merge `desired` into the layout of `observed`.
///
/// Items present in both keep their observed position. Slots freed by
/// observed items that are no longer desired are refilled, in order, by the
/// desired items that are new; slots left over once new items run out are
/// dropped, and new items left over once slots run out are appended. The
/// result therefore holds exactly the desired items, and merging the result
/// again with the same `desired` returns it unchanged.
pub fn merge<T>(observed: &[T], desired: &[T]) -> Vec<T>
where
    T: Clone + Hash + Eq,
{
    let desired_set: IndexSet<&T> = desired.iter().collect();
    if desired_set.is_empty() {
        return Vec::new();
    }

    let observed_set: IndexSet<&T> = observed.iter().collect();
    if observed_set.is_empty() {
        return desired_set.into_iter().cloned().collect();
    }

    let mut fresh = desired_set
        .iter()
        .filter(|item| !observed_set.contains(*item))
        .copied();

    let mut merged: Vec<T> = Vec::with_capacity(desired_set.len());
    for item in observed_set.iter() {
        if desired_set.contains(*item) {
            merged.push((*item).clone());
        } else if let Some(replacement) = fresh.next() {
            merged.push(replacement.clone());
        }
    }
    merged.extend(fresh.cloned());

    merged
}
