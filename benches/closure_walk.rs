use std::collections::{BTreeSet, HashSet};
use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use uuid::Uuid;

use group_graph::closure::{MemoryNeighborLocker, locked_closure};
use group_graph::invariants::subgroup_cycle_violation;
use group_graph::models::{Direction, GroupEdge, GroupId, LockMode};

fn lcg_next(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
    *state
}

fn gid(n: u128) -> GroupId {
    GroupId(Uuid::from_u128(n + 1))
}

fn synthetic_dag(node_count: usize, edge_count: usize) -> Vec<GroupEdge> {
    let ids = (0..node_count).map(|idx| gid(idx as u128)).collect::<Vec<_>>();

    let mut state = 0x1234_5678_9abc_def0u64;
    let mut seen = HashSet::with_capacity(edge_count);
    let mut edges = Vec::with_capacity(edge_count);
    while edges.len() < edge_count {
        let a = (lcg_next(&mut state) as usize) % node_count;
        let b = (lcg_next(&mut state) as usize) % node_count;
        if a == b {
            continue;
        }
        let (from, to) = if a < b { (a, b) } else { (b, a) };
        if seen.insert((from, to)) {
            edges.push(GroupEdge {
                supergroup_id: ids[from],
                subgroup_id: ids[to],
            });
        }
    }

    edges
}

fn bench_descendant_walk(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime should build");

    let mut group = c.benchmark_group("descendant_walk");
    for (nodes, edges) in [(1_000usize, 3_000usize), (3_000usize, 9_000usize)] {
        let edge_data = synthetic_dag(nodes, edges);
        let locker = MemoryNeighborLocker::new(&edge_data);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("locked_closure", format!("{nodes}n_{edges}e")),
            &locker,
            |b, locker| {
                let mut seed = 42u64;
                let mut locker = locker.clone();
                b.iter(|| {
                    let start = gid((lcg_next(&mut seed) % nodes as u64) as u128);
                    let closure = rt
                        .block_on(locked_closure(
                            &mut locker,
                            start,
                            Direction::Descendants,
                            LockMode::NoWait,
                        ))
                        .expect("walk should succeed");
                    black_box(closure);
                });
            },
        );
    }
    group.finish();
}

fn bench_cycle_guard(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime should build");

    let mut group = c.benchmark_group("cycle_guard");
    for (nodes, edges) in [(1_000usize, 3_000usize), (3_000usize, 9_000usize)] {
        let edge_data = synthetic_dag(nodes, edges);
        let mut locker = MemoryNeighborLocker::new(&edge_data);

        // Precomputed closures; the guard itself is pure set membership.
        let target = gid(0);
        let ancestors: BTreeSet<GroupId> = rt
            .block_on(locked_closure(
                &mut locker,
                target,
                Direction::Ancestors,
                LockMode::Blocking,
            ))
            .expect("walk should succeed");
        let candidates = (0..nodes)
            .step_by(7)
            .map(|idx| {
                let candidate = gid(idx as u128);
                let descendants = rt
                    .block_on(locked_closure(
                        &mut locker,
                        candidate,
                        Direction::Descendants,
                        LockMode::NoWait,
                    ))
                    .expect("walk should succeed");
                (candidate, descendants)
            })
            .collect::<Vec<_>>();

        group.throughput(Throughput::Elements(candidates.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("subgroup_cycle_violation", format!("{nodes}n_{edges}e")),
            &candidates,
            |b, candidates| {
                b.iter(|| {
                    for (candidate, descendants) in candidates {
                        black_box(subgroup_cycle_violation(
                            target,
                            &ancestors,
                            *candidate,
                            descendants,
                        ));
                    }
                });
            },
        );
    }
    group.finish();
}

criterion_group!(closure_walk, bench_descendant_walk, bench_cycle_guard);
criterion_main!(closure_walk);
