use std::collections::BTreeSet;

use anyhow::anyhow;

use crate::algorithms;
use crate::error::{LibError, Result};
use crate::models::{GroupEdge, GroupId};

/// Decide whether attaching `candidate` as a direct subgroup of `target`
/// would close a loop, given both groups' already-computed closures.
///
/// Pure and non-mutating: the caller is responsible for having locked the
/// rows the closures were computed from. Returns the offending candidate on
/// violation. The closures may include their own starting node; the target
/// and candidate endpoints are checked explicitly either way.
pub fn subgroup_cycle_violation(
    target: GroupId,
    ancestors_of_target: &BTreeSet<GroupId>,
    candidate: GroupId,
    descendants_of_candidate: &BTreeSet<GroupId>,
) -> Option<GroupId> {
    if candidate == target
        || ancestors_of_target.contains(&candidate)
        || descendants_of_candidate.contains(&target)
    {
        return Some(candidate);
    }
    None
}

/// Assert that an edge set forms a DAG.
pub fn ensure_acyclic(edges: &[GroupEdge]) -> Result<()> {
    if algorithms::has_cycle(edges) {
        return Err(LibError::invalid_with_code(
            "group_cycle",
            "Group hierarchy must be acyclic",
            anyhow!("cycle found in {} edges", edges.len()),
        ));
    }
    Ok(())
}
