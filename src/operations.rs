use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::db;
use crate::error::Result;
use crate::hooks::Rendezvous;
use crate::models::{
    AuditLogEntry, GroupId, ModifySubgroupsPayload, ReplaceSubgroupsPayload, SubgroupChange,
    SubgroupListing, SupergroupListing, UserId,
};

/// High-level hierarchy actions with a single serializable entry point.
///
/// Callers must provide a trusted `actor` sourced from validated auth/session
/// state, not from request arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum GroupOperation {
    ReplaceSubgroups {
        group_id: GroupId,
        payload: ReplaceSubgroupsPayload,
    },
    ModifySubgroups {
        group_id: GroupId,
        payload: ModifySubgroupsPayload,
    },
    GetSubgroups {
        group_id: GroupId,
        #[serde(default)]
        recursive: bool,
    },
    GetSupergroups {
        group_id: GroupId,
        #[serde(default)]
        recursive: bool,
    },
    GetAuditLog {
        group_id: GroupId,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum GroupOperationResult {
    Change { change: SubgroupChange },
    Subgroups { listing: SubgroupListing },
    Supergroups { listing: SupergroupListing },
    AuditLog { entries: Vec<AuditLogEntry> },
}

#[derive(Clone)]
pub struct GroupOperations {
    pool: Arc<PgPool>,
    rendezvous: Rendezvous,
}

impl GroupOperations {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self {
            pool,
            rendezvous: Rendezvous::disabled(),
        }
    }

    pub fn from_pool(pool: &PgPool) -> Self {
        Self::new(Arc::new(pool.clone()))
    }

    /// Pause each mutation at `rendezvous` after its first lock; test wiring
    /// only, the default is a no-op.
    pub fn with_rendezvous(mut self, rendezvous: Rendezvous) -> Self {
        self.rendezvous = rendezvous;
        self
    }

    pub fn pool(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }

    pub async fn execute(
        &self,
        actor: Option<UserId>,
        operation: GroupOperation,
    ) -> Result<GroupOperationResult> {
        match operation {
            GroupOperation::ReplaceSubgroups { group_id, payload } => {
                let change = self.replace_subgroups(actor, group_id, payload).await?;
                Ok(GroupOperationResult::Change { change })
            }
            GroupOperation::ModifySubgroups { group_id, payload } => {
                let change = self.modify_subgroups(actor, group_id, payload).await?;
                Ok(GroupOperationResult::Change { change })
            }
            GroupOperation::GetSubgroups {
                group_id,
                recursive,
            } => {
                let listing = self.get_subgroups(group_id, recursive).await?;
                Ok(GroupOperationResult::Subgroups { listing })
            }
            GroupOperation::GetSupergroups {
                group_id,
                recursive,
            } => {
                let listing = self.get_supergroups(group_id, recursive).await?;
                Ok(GroupOperationResult::Supergroups { listing })
            }
            GroupOperation::GetAuditLog { group_id } => {
                let entries = db::list_audit_log(&self.pool, group_id).await?;
                Ok(GroupOperationResult::AuditLog { entries })
            }
        }
    }

    pub async fn replace_subgroups(
        &self,
        actor: Option<UserId>,
        group_id: GroupId,
        payload: ReplaceSubgroupsPayload,
    ) -> Result<SubgroupChange> {
        let subgroup_ids = payload.normalize();
        db::update_subgroups(&self.pool, group_id, &subgroup_ids, actor, &self.rendezvous).await
    }

    pub async fn modify_subgroups(
        &self,
        actor: Option<UserId>,
        group_id: GroupId,
        payload: ModifySubgroupsPayload,
    ) -> Result<SubgroupChange> {
        let (add, delete) = payload.normalize()?;
        db::modify_subgroups(&self.pool, group_id, &add, &delete, actor, &self.rendezvous).await
    }

    pub async fn get_subgroups(
        &self,
        group_id: GroupId,
        recursive: bool,
    ) -> Result<SubgroupListing> {
        let subgroup_ids = if recursive {
            db::list_recursive_subgroups(&self.pool, group_id).await?
        } else {
            db::list_direct_subgroups(&self.pool, group_id).await?
        };
        Ok(SubgroupListing {
            group_id,
            subgroup_ids,
        })
    }

    pub async fn get_supergroups(
        &self,
        group_id: GroupId,
        recursive: bool,
    ) -> Result<SupergroupListing> {
        let supergroup_ids = if recursive {
            db::list_recursive_supergroups(&self.pool, group_id).await?
        } else {
            db::list_direct_supergroups(&self.pool, group_id).await?
        };
        Ok(SupergroupListing {
            group_id,
            supergroup_ids,
        })
    }
}
