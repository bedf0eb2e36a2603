use std::collections::BTreeSet;
use std::future::Future;

use anyhow::anyhow;
use once_cell::sync::Lazy;
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::{FromRow, PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::closure::{NeighborLocker, locked_closure_with_rendezvous};
use crate::error::{LibError, Result, classify_store_error};
use crate::hooks::Rendezvous;
use crate::invariants;
use crate::models::{
    AuditLogEntry, Direction, Group, GroupEdge, GroupId, LockMode, SubgroupAuditEvent,
    SubgroupChange, UserId,
};

pub static MIGRATOR: Lazy<Migrator> = Lazy::new(|| {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
});

pub async fn create_group_tables(pool: &PgPool) -> std::result::Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[derive(Debug, Clone, FromRow)]
struct GroupRow {
    id: Uuid,
    name: String,
    created_at: chrono::NaiveDateTime,
    updated_at: chrono::NaiveDateTime,
}

impl From<GroupRow> for Group {
    fn from(value: GroupRow) -> Self {
        Self {
            id: GroupId(value.id),
            name: value.name,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct AuditRow {
    id: i64,
    group_id: Uuid,
    event_type: String,
    acting_user_id: Option<Uuid>,
    subgroup_ids: Vec<Uuid>,
    event_time: chrono::NaiveDateTime,
}

impl TryFrom<AuditRow> for AuditLogEntry {
    type Error = LibError;

    fn try_from(value: AuditRow) -> Result<Self> {
        let event = SubgroupAuditEvent::from_db_value(&value.event_type).ok_or_else(|| {
            LibError::database(
                "Unrecognized audit event",
                anyhow!("audit row {} has event type '{}'", value.id, value.event_type),
            )
        })?;

        Ok(Self {
            id: value.id,
            group_id: GroupId(value.group_id),
            event,
            acting_user_id: value.acting_user_id.map(UserId),
            subgroup_ids: value.subgroup_ids.into_iter().map(GroupId).collect(),
            event_time: value.event_time,
        })
    }
}

fn db_err(public: &'static str, err: sqlx::Error) -> LibError {
    classify_store_error(public, err)
}

const fn group_lock_sql(mode: LockMode) -> &'static str {
    match mode {
        LockMode::Blocking => "SELECT id FROM groups.groups WHERE id = $1 FOR UPDATE",
        LockMode::NoWait => "SELECT id FROM groups.groups WHERE id = $1 FOR UPDATE NOWAIT",
    }
}

const fn edge_lock_sql(direction: Direction, mode: LockMode) -> &'static str {
    match (direction, mode) {
        (Direction::Ancestors, LockMode::Blocking) => {
            "SELECT supergroup_id FROM groups.group_edges \
             WHERE subgroup_id = $1 ORDER BY supergroup_id FOR UPDATE"
        }
        (Direction::Ancestors, LockMode::NoWait) => {
            "SELECT supergroup_id FROM groups.group_edges \
             WHERE subgroup_id = $1 ORDER BY supergroup_id FOR UPDATE NOWAIT"
        }
        (Direction::Descendants, LockMode::Blocking) => {
            "SELECT subgroup_id FROM groups.group_edges \
             WHERE supergroup_id = $1 ORDER BY subgroup_id FOR UPDATE"
        }
        (Direction::Descendants, LockMode::NoWait) => {
            "SELECT subgroup_id FROM groups.group_edges \
             WHERE supergroup_id = $1 ORDER BY subgroup_id FOR UPDATE NOWAIT"
        }
    }
}

/// Row-locking [`NeighborLocker`] over the live edge table.
///
/// Locks the group row first, then the edge rows being read, so a concurrent
/// writer cannot slip a new edge past a walk in progress.
struct PgNeighborLocker<'c> {
    conn: &'c mut PgConnection,
}

impl NeighborLocker for PgNeighborLocker<'_> {
    fn lock_and_fetch(
        &mut self,
        node: GroupId,
        direction: Direction,
        mode: LockMode,
    ) -> impl Future<Output = Result<Vec<GroupId>>> + Send {
        async move {
            let locked: Option<(Uuid,)> = sqlx::query_as(group_lock_sql(mode))
                .bind(node.0)
                .fetch_optional(&mut *self.conn)
                .await
                .map_err(|err| db_err("Failed to lock group row", err))?;
            if locked.is_none() {
                return Err(LibError::not_found(
                    "Group not found",
                    anyhow!("group {} does not exist", node),
                ));
            }

            let rows: Vec<(Uuid,)> = sqlx::query_as(edge_lock_sql(direction, mode))
                .bind(node.0)
                .fetch_all(&mut *self.conn)
                .await
                .map_err(|err| db_err("Failed to lock group edges", err))?;

            Ok(rows.into_iter().map(|row| GroupId(row.0)).collect())
        }
    }
}

/// The shape of a requested subgroup mutation, after payload normalization.
#[derive(Debug, Clone)]
enum SubgroupMutation {
    /// The direct subgroup set becomes exactly this set; idempotent.
    Replace(BTreeSet<GroupId>),
    /// Strict additions and removals; both reject no-op members.
    Modify {
        add: BTreeSet<GroupId>,
        delete: BTreeSet<GroupId>,
    },
}

impl SubgroupMutation {
    /// Groups whose attachment must pass cycle validation.
    fn candidates(&self) -> &BTreeSet<GroupId> {
        match self {
            SubgroupMutation::Replace(desired) => desired,
            SubgroupMutation::Modify { add, .. } => add,
        }
    }

    /// Resolve against the locked current subgroup set into (add, remove).
    fn diff(&self, current: &BTreeSet<GroupId>) -> Result<(BTreeSet<GroupId>, BTreeSet<GroupId>)> {
        match self {
            SubgroupMutation::Replace(desired) => {
                let to_add = desired.difference(current).copied().collect();
                let to_remove = current.difference(desired).copied().collect();
                Ok((to_add, to_remove))
            }
            SubgroupMutation::Modify { add, delete } => {
                if let Some(present) = add.iter().find(|id| current.contains(id)) {
                    return Err(LibError::invalid_with_code(
                        "subgroup_already_present",
                        "Group is already a subgroup",
                        anyhow!("group {} is already a direct subgroup", present),
                    ));
                }
                if let Some(missing) = delete.iter().find(|id| !current.contains(id)) {
                    return Err(LibError::invalid_with_code(
                        "subgroup_not_present",
                        "Group is not a subgroup",
                        anyhow!("group {} is not a direct subgroup", missing),
                    ));
                }
                Ok((add.clone(), delete.clone()))
            }
        }
    }
}

/// Replace `target`'s direct subgroups with exactly `subgroup_ids`.
///
/// Serializes against every concurrent structural change touching the
/// candidates' descendant closures (fail-fast) or the target's ancestor
/// chain (blocking); see [`run_subgroup_transaction`] for the protocol.
pub async fn update_subgroups(
    pool: &PgPool,
    target: GroupId,
    subgroup_ids: &BTreeSet<GroupId>,
    acting_user: Option<UserId>,
    rendezvous: &Rendezvous,
) -> Result<SubgroupChange> {
    run_subgroup_transaction(
        pool,
        target,
        SubgroupMutation::Replace(subgroup_ids.clone()),
        acting_user,
        rendezvous,
    )
    .await
}

/// Apply strict additions and removals to `target`'s direct subgroups.
pub async fn modify_subgroups(
    pool: &PgPool,
    target: GroupId,
    add: &BTreeSet<GroupId>,
    delete: &BTreeSet<GroupId>,
    acting_user: Option<UserId>,
    rendezvous: &Rendezvous,
) -> Result<SubgroupChange> {
    run_subgroup_transaction(
        pool,
        target,
        SubgroupMutation::Modify {
            add: add.clone(),
            delete: delete.clone(),
        },
        acting_user,
        rendezvous,
    )
    .await
}

pub async fn add_subgroups(
    pool: &PgPool,
    target: GroupId,
    add: &BTreeSet<GroupId>,
    acting_user: Option<UserId>,
    rendezvous: &Rendezvous,
) -> Result<SubgroupChange> {
    modify_subgroups(pool, target, add, &BTreeSet::new(), acting_user, rendezvous).await
}

pub async fn remove_subgroups(
    pool: &PgPool,
    target: GroupId,
    delete: &BTreeSet<GroupId>,
    acting_user: Option<UserId>,
    rendezvous: &Rendezvous,
) -> Result<SubgroupChange> {
    modify_subgroups(pool, target, &BTreeSet::new(), delete, acting_user, rendezvous).await
}

/// One subgroup mutation as a single transaction.
///
/// Lock acquisition order:
///
/// 1. Each candidate's descendant closure, NOWAIT, candidates in ascending
///    id order. Contention with a writer already inside an overlapping
///    region fails immediately instead of waiting behind its validation.
/// 2. The target's ancestor closure, blocking. Two transactions whose
///    closures overlap in opposite orders form a circular wait here that the
///    store's deadlock detector resolves by aborting one of them.
///
/// Cycle validation is pure set membership over the two locked closures, so
/// no unlocked read can race the decision. The mutation itself is a diff
/// against the target's current (locked) edge rows, with one audit row per
/// added/removed batch, all released atomically at commit.
async fn run_subgroup_transaction(
    pool: &PgPool,
    target: GroupId,
    mutation: SubgroupMutation,
    acting_user: Option<UserId>,
    rendezvous: &Rendezvous,
) -> Result<SubgroupChange> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|err| db_err("Failed to start transaction", err))?;

    let mut pause = rendezvous.clone();
    let mut descendant_closures = Vec::with_capacity(mutation.candidates().len());
    for candidate in mutation.candidates() {
        let closure = locked_closure_with_rendezvous(
            &mut PgNeighborLocker { conn: &mut tx },
            *candidate,
            Direction::Descendants,
            LockMode::NoWait,
            &pause,
        )
        .await?;
        pause = Rendezvous::disabled();
        tracing::debug!(
            group = %target,
            candidate = %candidate,
            locked = closure.len(),
            "locked candidate descendant closure"
        );
        descendant_closures.push((*candidate, closure));
    }

    let ancestors = locked_closure_with_rendezvous(
        &mut PgNeighborLocker { conn: &mut tx },
        target,
        Direction::Ancestors,
        LockMode::Blocking,
        &pause,
    )
    .await?;
    tracing::debug!(group = %target, locked = ancestors.len(), "locked ancestor closure");

    for (candidate, descendants) in &descendant_closures {
        if let Some(offender) =
            invariants::subgroup_cycle_violation(target, &ancestors, *candidate, descendants)
        {
            return Err(LibError::cycle_rejected(
                offender,
                anyhow!("group {} cannot become a subgroup of {}", offender, target),
            ));
        }
    }

    let current = lock_direct_subgroups(&mut tx, target).await?;
    let (to_add, to_remove) = mutation.diff(&current)?;

    delete_edges(&mut tx, target, &to_remove).await?;
    insert_edges(&mut tx, target, &to_add).await?;
    record_audit(
        &mut tx,
        target,
        SubgroupAuditEvent::SubgroupsRemoved,
        acting_user,
        &to_remove,
    )
    .await?;
    record_audit(
        &mut tx,
        target,
        SubgroupAuditEvent::SubgroupsAdded,
        acting_user,
        &to_add,
    )
    .await?;

    tx.commit()
        .await
        .map_err(|err| db_err("Failed to commit subgroup update", err))?;

    tracing::info!(
        group = %target,
        added = to_add.len(),
        removed = to_remove.len(),
        "updated subgroups"
    );

    Ok(SubgroupChange {
        group_id: target,
        added: to_add,
        removed: to_remove,
    })
}

async fn lock_direct_subgroups(
    tx: &mut Transaction<'_, Postgres>,
    target: GroupId,
) -> Result<BTreeSet<GroupId>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT subgroup_id
        FROM groups.group_edges
        WHERE supergroup_id = $1
        ORDER BY subgroup_id
        FOR UPDATE
        "#,
    )
    .bind(target.0)
    .fetch_all(&mut **tx)
    .await
    .map_err(|err| db_err("Failed to lock subgroup edges", err))?;

    Ok(rows.into_iter().map(|row| GroupId(row.0)).collect())
}

async fn insert_edges(
    tx: &mut Transaction<'_, Postgres>,
    target: GroupId,
    subgroup_ids: &BTreeSet<GroupId>,
) -> Result<()> {
    for subgroup_id in subgroup_ids {
        sqlx::query(
            r#"
            INSERT INTO groups.group_edges (supergroup_id, subgroup_id)
            VALUES ($1, $2)
            "#,
        )
        .bind(target.0)
        .bind(subgroup_id.0)
        .execute(&mut **tx)
        .await
        .map_err(|err| db_err("Failed to insert subgroup edges", err))?;
    }

    Ok(())
}

async fn delete_edges(
    tx: &mut Transaction<'_, Postgres>,
    target: GroupId,
    subgroup_ids: &BTreeSet<GroupId>,
) -> Result<()> {
    if subgroup_ids.is_empty() {
        return Ok(());
    }

    let ids: Vec<Uuid> = subgroup_ids.iter().map(|id| id.0).collect();
    sqlx::query(
        r#"
        DELETE FROM groups.group_edges
        WHERE supergroup_id = $1
          AND subgroup_id = ANY($2)
        "#,
    )
    .bind(target.0)
    .bind(&ids)
    .execute(&mut **tx)
    .await
    .map_err(|err| db_err("Failed to delete subgroup edges", err))?;

    Ok(())
}

async fn record_audit(
    tx: &mut Transaction<'_, Postgres>,
    group_id: GroupId,
    event: SubgroupAuditEvent,
    acting_user: Option<UserId>,
    subgroup_ids: &BTreeSet<GroupId>,
) -> Result<()> {
    if subgroup_ids.is_empty() {
        return Ok(());
    }

    let ids: Vec<Uuid> = subgroup_ids.iter().map(|id| id.0).collect();
    sqlx::query(
        r#"
        INSERT INTO groups.group_audit_log (group_id, event_type, acting_user_id, subgroup_ids)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(group_id.0)
    .bind(event.as_db_value())
    .bind(acting_user.map(|user| user.0))
    .bind(&ids)
    .execute(&mut **tx)
    .await
    .map_err(|err| db_err("Failed to record audit entry", err))?;

    Ok(())
}

pub async fn create_group(pool: &PgPool, name: &str) -> Result<Group> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LibError::invalid(
            "Group name is required",
            anyhow!("empty group name"),
        ));
    }

    let group_id = GroupId(Uuid::new_v4());
    sqlx::query(
        r#"
        INSERT INTO groups.groups (id, name)
        VALUES ($1, $2)
        "#,
    )
    .bind(group_id.0)
    .bind(name)
    .execute(pool)
    .await
    .map_err(|err| db_err("Failed to create group", err))?;

    get_group(pool, group_id).await
}

pub async fn get_group(pool: &PgPool, group_id: GroupId) -> Result<Group> {
    let row = sqlx::query_as::<_, GroupRow>(
        r#"
        SELECT id, name, created_at, updated_at
        FROM groups.groups
        WHERE id = $1
        "#,
    )
    .bind(group_id.0)
    .fetch_optional(pool)
    .await
    .map_err(|err| db_err("Failed to query group", err))?;

    row.map(Group::from).ok_or_else(|| {
        LibError::not_found(
            "Group not found",
            anyhow!("group {} not found", group_id),
        )
    })
}

pub async fn list_direct_subgroups(pool: &PgPool, group_id: GroupId) -> Result<Vec<GroupId>> {
    let _group = get_group(pool, group_id).await?;
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT subgroup_id
        FROM groups.group_edges
        WHERE supergroup_id = $1
        ORDER BY subgroup_id
        "#,
    )
    .bind(group_id.0)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to query subgroups", err))?;

    Ok(rows.into_iter().map(|row| GroupId(row.0)).collect())
}

pub async fn list_direct_supergroups(pool: &PgPool, group_id: GroupId) -> Result<Vec<GroupId>> {
    let _group = get_group(pool, group_id).await?;
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT supergroup_id
        FROM groups.group_edges
        WHERE subgroup_id = $1
        ORDER BY supergroup_id
        "#,
    )
    .bind(group_id.0)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to query supergroups", err))?;

    Ok(rows.into_iter().map(|row| GroupId(row.0)).collect())
}

/// Recursive membership closure, starting group included.
///
/// Read-only: snapshot consistency is enough here, only writers lock.
pub async fn list_recursive_subgroups(pool: &PgPool, group_id: GroupId) -> Result<Vec<GroupId>> {
    let _group = get_group(pool, group_id).await?;
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        WITH RECURSIVE closure AS (
            SELECT id FROM groups.groups WHERE id = $1
            UNION
            SELECT e.subgroup_id AS id
            FROM groups.group_edges e
            JOIN closure c ON e.supergroup_id = c.id
        )
        SELECT id FROM closure ORDER BY id
        "#,
    )
    .bind(group_id.0)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to query recursive subgroups", err))?;

    Ok(rows.into_iter().map(|row| GroupId(row.0)).collect())
}

pub async fn list_recursive_supergroups(pool: &PgPool, group_id: GroupId) -> Result<Vec<GroupId>> {
    let _group = get_group(pool, group_id).await?;
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        WITH RECURSIVE closure AS (
            SELECT id FROM groups.groups WHERE id = $1
            UNION
            SELECT e.supergroup_id AS id
            FROM groups.group_edges e
            JOIN closure c ON e.subgroup_id = c.id
        )
        SELECT id FROM closure ORDER BY id
        "#,
    )
    .bind(group_id.0)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to query recursive supergroups", err))?;

    Ok(rows.into_iter().map(|row| GroupId(row.0)).collect())
}

/// Every edge in the hierarchy, ordered for stable comparison.
pub async fn list_edges(pool: &PgPool) -> Result<Vec<GroupEdge>> {
    let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
        r#"
        SELECT supergroup_id, subgroup_id
        FROM groups.group_edges
        ORDER BY supergroup_id, subgroup_id
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to query group edges", err))?;

    Ok(rows
        .into_iter()
        .map(|(supergroup_id, subgroup_id)| GroupEdge {
            supergroup_id: GroupId(supergroup_id),
            subgroup_id: GroupId(subgroup_id),
        })
        .collect())
}

pub async fn list_audit_log(pool: &PgPool, group_id: GroupId) -> Result<Vec<AuditLogEntry>> {
    let _group = get_group(pool, group_id).await?;
    let rows = sqlx::query_as::<_, AuditRow>(
        r#"
        SELECT id, group_id, event_type, acting_user_id, subgroup_ids, event_time
        FROM groups.group_audit_log
        WHERE group_id = $1
        ORDER BY id
        "#,
    )
    .bind(group_id.0)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to query audit log", err))?;

    rows.into_iter().map(AuditLogEntry::try_from).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use uuid::Uuid;

    use super::{SubgroupMutation, edge_lock_sql, group_lock_sql};
    use crate::models::{Direction, GroupId, LockMode};

    fn gid(n: u128) -> GroupId {
        GroupId(Uuid::from_u128(n + 1))
    }

    #[test]
    fn nowait_variants_never_wait() {
        assert!(group_lock_sql(LockMode::NoWait).ends_with("NOWAIT"));
        assert!(!group_lock_sql(LockMode::Blocking).contains("NOWAIT"));

        for direction in [Direction::Ancestors, Direction::Descendants] {
            assert!(edge_lock_sql(direction, LockMode::NoWait).ends_with("NOWAIT"));
            assert!(!edge_lock_sql(direction, LockMode::Blocking).contains("NOWAIT"));
        }
    }

    #[test]
    fn edge_walks_order_by_the_neighbor_column() {
        assert!(
            edge_lock_sql(Direction::Ancestors, LockMode::Blocking)
                .contains("ORDER BY supergroup_id")
        );
        assert!(
            edge_lock_sql(Direction::Descendants, LockMode::Blocking)
                .contains("ORDER BY subgroup_id")
        );
    }

    #[test]
    fn replace_diff_is_a_symmetric_difference() {
        let current = [gid(0), gid(1)].into();
        let mutation = SubgroupMutation::Replace([gid(1), gid(2)].into());

        let (to_add, to_remove) = mutation.diff(&current).expect("diff should succeed");
        assert_eq!(to_add, BTreeSet::from([gid(2)]));
        assert_eq!(to_remove, BTreeSet::from([gid(0)]));
    }

    #[test]
    fn replace_diff_of_identical_sets_is_empty() {
        let current = [gid(0), gid(1)].into();
        let mutation = SubgroupMutation::Replace([gid(0), gid(1)].into());

        let (to_add, to_remove) = mutation.diff(&current).expect("diff should succeed");
        assert!(to_add.is_empty());
        assert!(to_remove.is_empty());
    }

    #[test]
    fn modify_diff_rejects_present_addition_and_missing_removal() {
        let current = [gid(0)].into();

        let mutation = SubgroupMutation::Modify {
            add: [gid(0)].into(),
            delete: Default::default(),
        };
        let err = mutation.diff(&current).expect_err("should reject");
        assert_eq!(err.code, "subgroup_already_present");

        let mutation = SubgroupMutation::Modify {
            add: Default::default(),
            delete: [gid(5)].into(),
        };
        let err = mutation.diff(&current).expect_err("should reject");
        assert_eq!(err.code, "subgroup_not_present");
    }
}
