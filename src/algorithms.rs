use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::models::{GroupEdge, GroupId};

/// Map each supergroup to its direct subgroups.
pub fn adjacency_map(edges: &[GroupEdge]) -> HashMap<GroupId, Vec<GroupId>> {
    let mut adjacency: HashMap<GroupId, Vec<GroupId>> = HashMap::new();
    for edge in edges {
        adjacency
            .entry(edge.supergroup_id)
            .or_default()
            .push(edge.subgroup_id);
        adjacency.entry(edge.subgroup_id).or_default();
    }
    adjacency
}

/// Map each subgroup to its direct supergroups.
pub fn reverse_adjacency_map(edges: &[GroupEdge]) -> HashMap<GroupId, Vec<GroupId>> {
    let mut adjacency: HashMap<GroupId, Vec<GroupId>> = HashMap::new();
    for edge in edges {
        adjacency
            .entry(edge.subgroup_id)
            .or_default()
            .push(edge.supergroup_id);
        adjacency.entry(edge.supergroup_id).or_default();
    }
    adjacency
}

/// Brute-force transitive closure from `start`, including `start` itself.
pub fn reachable_set(
    start: GroupId,
    adjacency: &HashMap<GroupId, Vec<GroupId>>,
) -> BTreeSet<GroupId> {
    let mut reachable = BTreeSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(start);
    reachable.insert(start);

    while let Some(group_id) = queue.pop_front() {
        if let Some(children) = adjacency.get(&group_id) {
            for child in children {
                if reachable.insert(*child) {
                    queue.push_back(*child);
                }
            }
        }
    }

    reachable
}

/// Kahn's algorithm over the groups appearing in `edges`.
pub fn has_cycle(edges: &[GroupEdge]) -> bool {
    let adjacency = adjacency_map(edges);
    let mut indegree: HashMap<GroupId, usize> = HashMap::with_capacity(adjacency.len());
    for group_id in adjacency.keys() {
        indegree.insert(*group_id, 0);
    }
    for edge in edges {
        *indegree
            .get_mut(&edge.subgroup_id)
            .expect("subgroup_id should exist in indegree map") += 1;
    }

    let mut queue = VecDeque::new();
    for (group_id, degree) in &indegree {
        if *degree == 0 {
            queue.push_back(*group_id);
        }
    }

    let mut visited_count = 0usize;
    while let Some(group_id) = queue.pop_front() {
        visited_count += 1;
        if let Some(children) = adjacency.get(&group_id) {
            for child in children {
                if let Some(child_degree) = indegree.get_mut(child) {
                    *child_degree -= 1;
                    if *child_degree == 0 {
                        queue.push_back(*child);
                    }
                }
            }
        }
    }

    visited_count != adjacency.len()
}
