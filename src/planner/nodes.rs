//! Node selection
//!
//! Picks the nodes that make up a cluster plan. Nodes already in the plan
//! stay in it, in their current order, for as long as they remain eligible;
//! new nodes are only pulled in to reach the minimum pool count.

use crate::crd::PlannedNode;
use crate::error::{Error, Result};
use crate::planner::defaults::ResolvedIntent;
use crate::planner::merge::merge;
use crate::planner::selector::Selector;
use k8s_openapi::api::core::v1::Node;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Nodes matching `selector` that can take a pool, sorted by name
pub fn eligible_nodes(nodes: &[Node], selector: &Selector) -> Result<Vec<PlannedNode>> {
    let mut eligible = Vec::new();

    for node in nodes {
        let (Some(name), Some(uid)) = (node.metadata.name.as_ref(), node.metadata.uid.as_ref())
        else {
            warn!("skipping node without name or uid");
            continue;
        };

        let unschedulable = node
            .spec
            .as_ref()
            .and_then(|spec| spec.unschedulable)
            .unwrap_or(false);
        if unschedulable {
            debug!(node = %name, "skipping unschedulable node");
            continue;
        }

        if selector.matches_resource(Some(node))? {
            eligible.push(PlannedNode::new(name, uid));
        }
    }

    eligible.sort();
    Ok(eligible)
}

/// Choose the plan's nodes out of `eligible`, keeping `previous` stable
pub fn select_nodes(
    eligible: &[PlannedNode],
    previous: &[PlannedNode],
    intent: &ResolvedIntent,
) -> Result<Vec<PlannedNode>> {
    if eligible.len() < intent.min_pool_count {
        return Err(Error::Validation(format!(
            "only {} eligible nodes for minPoolCount {}",
            eligible.len(),
            intent.min_pool_count
        )));
    }

    // current names win; a renamed node keeps its slot through its uid
    let by_uid: BTreeMap<&str, &PlannedNode> =
        eligible.iter().map(|n| (n.uid.as_str(), n)).collect();

    let mut chosen: Vec<String> = previous
        .iter()
        .filter(|n| by_uid.contains_key(n.uid.as_str()))
        .map(|n| n.uid.clone())
        .take(intent.max_pool_count)
        .collect();

    for node in eligible {
        if chosen.len() >= intent.min_pool_count {
            break;
        }
        if !chosen.contains(&node.uid) {
            chosen.push(node.uid.clone());
        }
    }

    let previous_uids: Vec<String> = previous.iter().map(|n| n.uid.clone()).collect();
    let ordered = merge(&previous_uids, &chosen);

    Ok(ordered
        .iter()
        .filter_map(|uid| by_uid.get(uid.as_str()).map(|n| (*n).clone()))
        .collect())
}
