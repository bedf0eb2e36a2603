use anyhow::anyhow;
use serde::Serialize;

use crate::models::GroupId;

pub type Result<T> = std::result::Result<T, LibError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The requested change would close a loop in the hierarchy. A caller
    /// input error; retrying without changing the input cannot succeed.
    CycleRejected,
    /// Any store failure unrelated to lock arbitration.
    Database,
    /// The store aborted this transaction to break a circular lock wait.
    Deadlock,
    InvalidInput,
    /// A NOWAIT lock acquisition found the row held by another transaction.
    LockBusy,
    NotFound,
    Unknown,
}

impl ErrorKind {
    /// Transient kinds are safe to retry unchanged; the rest are not.
    pub const fn is_transient(self) -> bool {
        matches!(self, ErrorKind::Deadlock | ErrorKind::LockBusy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorDetails {
    CycleRejected { offending_group_id: GroupId },
}

#[derive(Debug)]
pub struct LibError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub public: &'static str,
    pub details: Option<ErrorDetails>,
    pub source: anyhow::Error,
}

impl LibError {
    pub fn database(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Database,
            code: "database_error",
            public,
            details: None,
            source,
        }
    }

    pub fn deadlock(source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Deadlock,
            code: "deadlock_detected",
            public: "Deadlock detected",
            details: None,
            source,
        }
    }

    pub fn lock_busy(source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::LockBusy,
            code: "busy_lock",
            public: "Busy lock detected",
            details: None,
            source,
        }
    }

    pub fn cycle_rejected(offending_group_id: GroupId, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::CycleRejected,
            code: "subgroup_cycle",
            public: "Subgroup cycle detected",
            details: Some(ErrorDetails::CycleRejected { offending_group_id }),
            source,
        }
    }

    pub fn invalid(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            code: "invalid_input",
            public,
            details: None,
            source,
        }
    }

    pub fn invalid_with_code(
        code: &'static str,
        public: &'static str,
        source: anyhow::Error,
    ) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            code,
            public,
            details: None,
            source,
        }
    }

    pub fn not_found(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            code: "not_found",
            public,
            details: None,
            source,
        }
    }

    pub fn unknown(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            code: "unknown_error",
            public,
            details: None,
            source,
        }
    }

    pub fn unknown_with_code(
        code: &'static str,
        public: &'static str,
        source: anyhow::Error,
    ) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            code,
            public,
            details: None,
            source,
        }
    }

    pub fn message(public: &'static str) -> Self {
        Self::unknown(public, anyhow!(public))
    }

    /// The group that made a rejected change cyclic, when that is what failed.
    pub fn offending_group(&self) -> Option<GroupId> {
        match self.details {
            Some(ErrorDetails::CycleRejected { offending_group_id }) => Some(offending_group_id),
            None => None,
        }
    }
}

/// PostgreSQL SQLSTATE for `deadlock_detected`.
#[cfg(feature = "sqlx")]
const SQLSTATE_DEADLOCK_DETECTED: &str = "40P01";

/// PostgreSQL SQLSTATE for `lock_not_available` (a failed NOWAIT acquisition).
#[cfg(feature = "sqlx")]
const SQLSTATE_LOCK_NOT_AVAILABLE: &str = "55P03";

/// Map a store-level failure onto the conflict taxonomy.
///
/// Lock arbitration outcomes are recognized by SQLSTATE; everything else is
/// surfaced unchanged as a database error.
#[cfg(feature = "sqlx")]
pub fn classify_store_error(public: &'static str, err: sqlx::Error) -> LibError {
    let sqlstate = err
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned());

    match sqlstate.as_deref() {
        Some(SQLSTATE_DEADLOCK_DETECTED) => LibError::deadlock(anyhow!(err)),
        Some(SQLSTATE_LOCK_NOT_AVAILABLE) => LibError::lock_busy(anyhow!(err)),
        _ => LibError::database(public, anyhow!(err)),
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for LibError {
    fn from(value: sqlx::Error) -> Self {
        classify_store_error("Database request failed", value)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use uuid::Uuid;

    use super::{ErrorKind, LibError};
    use crate::models::GroupId;

    #[test]
    fn only_lock_conflicts_are_transient() {
        assert!(ErrorKind::Deadlock.is_transient());
        assert!(ErrorKind::LockBusy.is_transient());
        assert!(!ErrorKind::CycleRejected.is_transient());
        assert!(!ErrorKind::Database.is_transient());
        assert!(!ErrorKind::NotFound.is_transient());
    }

    #[test]
    fn cycle_rejection_carries_the_offending_group() {
        let offender = GroupId(Uuid::new_v4());
        let err = LibError::cycle_rejected(offender, anyhow!("test"));
        assert_eq!(err.kind, ErrorKind::CycleRejected);
        assert_eq!(err.offending_group(), Some(offender));

        let other = LibError::deadlock(anyhow!("test"));
        assert_eq!(other.offending_group(), None);
    }

    #[cfg(feature = "sqlx")]
    #[test]
    fn non_lock_store_failures_stay_database_errors() {
        let err = super::classify_store_error("Failed", sqlx::Error::PoolTimedOut);
        assert_eq!(err.kind, ErrorKind::Database);
        assert_eq!(err.public, "Failed");
    }
}
