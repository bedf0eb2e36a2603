pub mod algorithms;
#[cfg(feature = "api")]
pub mod api;
pub mod closure;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod hooks;
pub mod invariants;
pub mod models;
#[cfg(feature = "sqlx")]
pub mod operations;

pub mod prelude {
    pub use crate::algorithms::{adjacency_map, has_cycle, reachable_set, reverse_adjacency_map};
    #[cfg(feature = "api")]
    pub use crate::api::{ActingUser, GroupApp, HasPool};
    pub use crate::closure::{
        MemoryNeighborLocker, NeighborLocker, locked_closure, locked_closure_with_rendezvous,
    };
    #[cfg(feature = "sqlx")]
    pub use crate::db::{
        add_subgroups, create_group, create_group_tables, get_group, list_direct_subgroups,
        list_direct_supergroups, list_recursive_subgroups, list_recursive_supergroups,
        modify_subgroups, remove_subgroups, update_subgroups,
    };
    pub use crate::error::{ErrorDetails, ErrorKind, LibError, Result};
    pub use crate::hooks::Rendezvous;
    pub use crate::invariants::{ensure_acyclic, subgroup_cycle_violation};
    pub use crate::models::{
        Direction, Group, GroupEdge, GroupId, LockMode, ModifySubgroupsPayload,
        ReplaceSubgroupsPayload, SubgroupChange, UserId,
    };
    #[cfg(feature = "sqlx")]
    pub use crate::operations::{GroupOperation, GroupOperationResult, GroupOperations};
}
