use serde::{Deserialize, Serialize};

use super::Dialect;
use crate::error::{OrmError, OrmResult};

/// Row locking requested on a SELECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Client-side version check after load; emits no SQL
    Optimistic,
    PessimisticRead,
    PessimisticWrite,
    /// Read uncommitted rows (SQL Server `NOLOCK`)
    DirtyRead,
    /// `FOR UPDATE SKIP LOCKED`
    PessimisticPartialWrite,
    /// `FOR UPDATE NOWAIT`
    PessimisticWriteOrFail,
    ForNoKeyUpdate,
    ForKeyShare,
}

impl LockMode {
    pub fn name(self) -> &'static str {
        match self {
            Self::Optimistic => "optimistic",
            Self::PessimisticRead => "pessimistic_read",
            Self::PessimisticWrite => "pessimistic_write",
            Self::DirtyRead => "dirty_read",
            Self::PessimisticPartialWrite => "pessimistic_partial_write",
            Self::PessimisticWriteOrFail => "pessimistic_write_or_fail",
            Self::ForNoKeyUpdate => "for_no_key_update",
            Self::ForKeyShare => "for_key_share",
        }
    }

    /// Modes that take row locks and therefore need a transaction.
    pub fn is_pessimistic(self) -> bool {
        !matches!(self, Self::Optimistic | Self::DirtyRead)
    }
}

/// Behaviour when a requested row is already locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OnLocked {
    SkipLocked,
    NoWait,
}

/// Where the lock syntax goes in the compiled SELECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockClause {
    None,
    /// Appended after LIMIT/OFFSET (`FOR UPDATE ...`)
    Suffix(String),
    /// Placed after the main table reference (`WITH (UPDLOCK, ROWLOCK)`)
    TableHint(String),
}

pub(super) fn lock_clause(
    dialect: Dialect,
    mode: LockMode,
    tables: &[String],
    on_locked: Option<OnLocked>,
) -> OrmResult<LockClause> {
    let unsupported = || OrmError::LockNotSupported {
        dialect: dialect.name(),
        mode: mode.name(),
    };

    if mode == LockMode::Optimistic {
        return Ok(LockClause::None);
    }

    // Partial write and write-or-fail are shorthands for an on-locked policy.
    let (mode, on_locked) = match mode {
        LockMode::PessimisticPartialWrite => (LockMode::PessimisticWrite, Some(OnLocked::SkipLocked)),
        LockMode::PessimisticWriteOrFail => (LockMode::PessimisticWrite, Some(OnLocked::NoWait)),
        other => (other, on_locked),
    };

    match dialect {
        Dialect::MsSql => {
            let hint = match (mode, on_locked) {
                (LockMode::DirtyRead, _) => "WITH (NOLOCK)",
                (LockMode::PessimisticRead, None) => "WITH (HOLDLOCK, ROWLOCK)",
                (LockMode::PessimisticWrite, None) => "WITH (UPDLOCK, ROWLOCK)",
                (LockMode::PessimisticWrite, Some(OnLocked::SkipLocked)) => "WITH (UPDLOCK, ROWLOCK, READPAST)",
                _ => return Err(unsupported()),
            };
            Ok(LockClause::TableHint(hint.to_string()))
        }
        _ if mode == LockMode::DirtyRead => Ok(LockClause::None),
        Dialect::Postgres | Dialect::CockroachDb | Dialect::MySql | Dialect::MariaDb => {
            let base = match (dialect, mode) {
                (Dialect::MariaDb, LockMode::PessimisticRead) => {
                    if !tables.is_empty() || on_locked.is_some() {
                        return Err(unsupported());
                    }
                    return Ok(LockClause::Suffix(" LOCK IN SHARE MODE".to_string()));
                }
                (_, LockMode::PessimisticRead) => " FOR SHARE",
                (_, LockMode::PessimisticWrite) => " FOR UPDATE",
                (Dialect::Postgres, LockMode::ForNoKeyUpdate) => " FOR NO KEY UPDATE",
                (Dialect::Postgres, LockMode::ForKeyShare) => " FOR KEY SHARE",
                _ => return Err(unsupported()),
            };
            let mut sql = base.to_string();
            if !tables.is_empty() {
                if dialect == Dialect::MariaDb {
                    return Err(unsupported());
                }
                sql.push_str(" OF ");
                sql.push_str(&tables.join(", "));
            }
            push_on_locked(&mut sql, on_locked);
            Ok(LockClause::Suffix(sql))
        }
        Dialect::Oracle => {
            if mode != LockMode::PessimisticWrite {
                return Err(unsupported());
            }
            let mut sql = " FOR UPDATE".to_string();
            push_on_locked(&mut sql, on_locked);
            Ok(LockClause::Suffix(sql))
        }
        Dialect::SapHana => {
            let mut sql = match mode {
                LockMode::PessimisticRead => " FOR SHARE LOCK".to_string(),
                LockMode::PessimisticWrite => " FOR UPDATE".to_string(),
                _ => return Err(unsupported()),
            };
            match on_locked {
                Some(OnLocked::NoWait) => sql.push_str(" NOWAIT"),
                Some(OnLocked::SkipLocked) => sql.push_str(" IGNORE LOCKED"),
                None => {}
            }
            Ok(LockClause::Suffix(sql))
        }
        Dialect::Sqlite | Dialect::LibSql | Dialect::DuckDb | Dialect::Spanner => Err(unsupported()),
    }
}

fn push_on_locked(sql: &mut String, on_locked: Option<OnLocked>) {
    match on_locked {
        Some(OnLocked::SkipLocked) => sql.push_str(" SKIP LOCKED"),
        Some(OnLocked::NoWait) => sql.push_str(" NOWAIT"),
        None => {}
    }
}
