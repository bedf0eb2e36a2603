use std::collections::{BTreeSet, HashMap};
use std::future::Future;

use crate::algorithms;
use crate::error::Result;
use crate::hooks::Rendezvous;
use crate::models::{Direction, GroupEdge, GroupId, LockMode};

/// Capability to lock one group's row and read its neighboring edges.
///
/// Implementations must lock the node row before reading its edge rows, and
/// lock the edge rows they return, so that no row consulted by a walk is
/// readable-but-unlocked. `NoWait` acquisitions that would block must fail
/// with a lock-busy error instead of waiting.
pub trait NeighborLocker {
    fn lock_and_fetch(
        &mut self,
        node: GroupId,
        direction: Direction,
        mode: LockMode,
    ) -> impl Future<Output = Result<Vec<GroupId>>> + Send;
}

/// Compute the reachable set from `start`, locking every visited row.
///
/// Explicit worklist walk; the smallest pending id is always expanded next,
/// so two transactions racing over overlapping regions acquire rows in a
/// comparable order and a true deadlock is a circular wait the store can
/// detect. The returned set includes `start`. Any lock failure aborts the
/// whole walk; no partial closure is returned.
pub async fn locked_closure<L: NeighborLocker>(
    locker: &mut L,
    start: GroupId,
    direction: Direction,
    mode: LockMode,
) -> Result<BTreeSet<GroupId>> {
    locked_closure_with_rendezvous(locker, start, direction, mode, &Rendezvous::disabled()).await
}

/// [`locked_closure`], pausing at `rendezvous` after the first acquisition.
pub async fn locked_closure_with_rendezvous<L: NeighborLocker>(
    locker: &mut L,
    start: GroupId,
    direction: Direction,
    mode: LockMode,
    rendezvous: &Rendezvous,
) -> Result<BTreeSet<GroupId>> {
    let mut visited: BTreeSet<GroupId> = BTreeSet::new();
    let mut pending: BTreeSet<GroupId> = BTreeSet::from([start]);
    let mut first_acquisition = true;

    while let Some(node) = pending.pop_first() {
        if !visited.insert(node) {
            continue;
        }

        let neighbors = locker.lock_and_fetch(node, direction, mode).await?;
        if std::mem::take(&mut first_acquisition) {
            rendezvous.wait().await?;
        }

        for neighbor in neighbors {
            if !visited.contains(&neighbor) {
                pending.insert(neighbor);
            }
        }
    }

    Ok(visited)
}

/// In-memory [`NeighborLocker`] over a fixed edge set.
///
/// Used by unit tests and benches; a single owner never contends, so both
/// lock modes behave identically. Groups are implied by edge endpoints and
/// unknown nodes simply have no neighbors.
#[derive(Debug, Clone)]
pub struct MemoryNeighborLocker {
    forward: HashMap<GroupId, Vec<GroupId>>,
    backward: HashMap<GroupId, Vec<GroupId>>,
    visit_log: Option<Vec<GroupId>>,
}

impl MemoryNeighborLocker {
    pub fn new(edges: &[GroupEdge]) -> Self {
        let mut forward = algorithms::adjacency_map(edges);
        let mut backward = algorithms::reverse_adjacency_map(edges);
        // The store returns neighbors in ascending id order; mirror that.
        for neighbors in forward.values_mut() {
            neighbors.sort_unstable();
        }
        for neighbors in backward.values_mut() {
            neighbors.sort_unstable();
        }

        Self {
            forward,
            backward,
            visit_log: None,
        }
    }

    /// Record the order nodes are expanded in, for traversal-order tests.
    pub fn with_visit_log(mut self) -> Self {
        self.visit_log = Some(Vec::new());
        self
    }

    pub fn visits(&self) -> &[GroupId] {
        self.visit_log.as_deref().unwrap_or_default()
    }
}

impl NeighborLocker for MemoryNeighborLocker {
    fn lock_and_fetch(
        &mut self,
        node: GroupId,
        direction: Direction,
        _mode: LockMode,
    ) -> impl Future<Output = Result<Vec<GroupId>>> + Send {
        if let Some(log) = self.visit_log.as_mut() {
            log.push(node);
        }
        let neighbors = match direction {
            Direction::Ancestors => self.backward.get(&node),
            Direction::Descendants => self.forward.get(&node),
        }
        .cloned()
        .unwrap_or_default();

        async move { Ok(neighbors) }
    }
}
