use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LibError, Result};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct GroupId(pub Uuid);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GroupId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

impl From<Uuid> for GroupId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct UserId(pub Uuid);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

impl From<Uuid> for UserId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Direction of a closure walk over supergroup → subgroup edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Follow edges backward, toward supergroups.
    Ancestors,
    /// Follow edges forward, toward subgroups.
    Descendants,
}

/// How row locks are acquired during a closure walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Wait for conflicting locks to release; the store's deadlock detector
    /// is the backstop when two walkers wait on each other.
    Blocking,
    /// Fail immediately if any row is already locked by another transaction.
    NoWait,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupEdge {
    pub supergroup_id: GroupId,
    pub subgroup_id: GroupId,
}

/// Replace a group's direct subgroups with exactly the given set.
///
/// Re-applying the same set is a no-op; an empty set clears all subgroup
/// edges.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceSubgroupsPayload {
    pub subgroup_ids: Vec<GroupId>,
}

impl ReplaceSubgroupsPayload {
    pub fn normalize(self) -> BTreeSet<GroupId> {
        self.subgroup_ids.into_iter().collect()
    }
}

/// Add and/or remove direct subgroups in one request.
///
/// Unlike replacement, modification is strict: adding a group that is already
/// a direct subgroup, or removing one that is not, is rejected.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifySubgroupsPayload {
    #[serde(default)]
    pub add: Vec<GroupId>,
    #[serde(default)]
    pub delete: Vec<GroupId>,
}

impl ModifySubgroupsPayload {
    pub fn normalize(self) -> Result<(BTreeSet<GroupId>, BTreeSet<GroupId>)> {
        let add: BTreeSet<GroupId> = self.add.into_iter().collect();
        let delete: BTreeSet<GroupId> = self.delete.into_iter().collect();

        if add.is_empty() && delete.is_empty() {
            return Err(LibError::invalid(
                "At least one subgroup addition or removal is required",
                anyhow!("empty add and delete lists"),
            ));
        }
        if let Some(conflicting) = add.intersection(&delete).next() {
            return Err(LibError::invalid(
                "A subgroup cannot be both added and removed",
                anyhow!("group {} appears in both add and delete", conflicting),
            ));
        }

        Ok((add, delete))
    }
}

/// Outcome of a committed subgroup mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubgroupChange {
    pub group_id: GroupId,
    pub added: BTreeSet<GroupId>,
    pub removed: BTreeSet<GroupId>,
}

impl SubgroupChange {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubgroupListing {
    pub group_id: GroupId,
    pub subgroup_ids: Vec<GroupId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupergroupListing {
    pub group_id: GroupId,
    pub supergroup_ids: Vec<GroupId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubgroupAuditEvent {
    SubgroupsAdded,
    SubgroupsRemoved,
}

impl SubgroupAuditEvent {
    pub const fn as_db_value(self) -> &'static str {
        match self {
            SubgroupAuditEvent::SubgroupsAdded => "subgroups_added",
            SubgroupAuditEvent::SubgroupsRemoved => "subgroups_removed",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "subgroups_added" => Some(SubgroupAuditEvent::SubgroupsAdded),
            "subgroups_removed" => Some(SubgroupAuditEvent::SubgroupsRemoved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: i64,
    pub group_id: GroupId,
    pub event: SubgroupAuditEvent,
    pub acting_user_id: Option<UserId>,
    pub subgroup_ids: Vec<GroupId>,
    pub event_time: NaiveDateTime,
}
