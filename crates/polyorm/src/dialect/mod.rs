//! Per-backend SQL syntax and capability table.
//!
//! Every syntax decision the compiler makes goes through a method on
//! [`Dialect`]; nothing else in the crate branches on the backend.

mod lock;
mod params;
mod types;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};

use crate::error::{OrmError, OrmResult};

pub use lock::{LockClause, LockMode, OnLocked};
pub use params::escape_query_with_parameters;
pub(crate) use types::parse_timestamp;

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    CockroachDb,
    MySql,
    MariaDb,
    Sqlite,
    LibSql,
    DuckDb,
    MsSql,
    Oracle,
    SapHana,
    Spanner,
}

/// Statement kinds that may carry a returning/output clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
}

impl StatementKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

/// How affected columns are read back from a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturningStyle {
    /// `... RETURNING cols` after the statement
    Returning,
    /// `OUTPUT INSERTED.cols` before VALUES / WHERE
    Output,
    None,
}

/// Upsert syntax family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStyle {
    /// `ON CONFLICT (...) DO NOTHING | DO UPDATE SET ...`
    OnConflict,
    /// `ON DUPLICATE KEY UPDATE ...`
    OnDuplicateKey,
    Unsupported,
}

/// Which generated id the driver reports after a multi-row insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertIdStrategy {
    /// id of the first inserted row (MySQL)
    FirstOfBatch,
    /// id of the last inserted row (SQLite)
    LastOfBatch,
    None,
}

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionIsolation {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl TransactionIsolation {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

impl Dialect {
    pub const ALL: [Dialect; 11] = [
        Dialect::Postgres,
        Dialect::CockroachDb,
        Dialect::MySql,
        Dialect::MariaDb,
        Dialect::Sqlite,
        Dialect::LibSql,
        Dialect::DuckDb,
        Dialect::MsSql,
        Dialect::Oracle,
        Dialect::SapHana,
        Dialect::Spanner,
    ];

    /// Backend tag used in error messages and logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::CockroachDb => "cockroachdb",
            Self::MySql => "mysql",
            Self::MariaDb => "mariadb",
            Self::Sqlite => "sqlite",
            Self::LibSql => "libsql",
            Self::DuckDb => "duckdb",
            Self::MsSql => "mssql",
            Self::Oracle => "oracle",
            Self::SapHana => "sap",
            Self::Spanner => "spanner",
        }
    }

    fn is_postgres_family(self) -> bool {
        matches!(self, Self::Postgres | Self::CockroachDb)
    }

    fn is_mysql_family(self) -> bool {
        matches!(self, Self::MySql | Self::MariaDb)
    }

    fn is_sqlite_family(self) -> bool {
        matches!(self, Self::Sqlite | Self::LibSql)
    }

    // ==================== Identifiers ====================

    /// Quote an identifier, doubling any embedded quote character.
    pub fn escape(self, ident: &str) -> String {
        match self {
            Self::MySql | Self::MariaDb | Self::Spanner => format!("`{}`", ident.replace('`', "``")),
            Self::MsSql => format!("[{}]", ident.replace(']', "]]")),
            _ => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Quote a possibly schema-qualified table path (`schema.table`).
    pub fn escape_path(self, path: &str) -> String {
        path.split('.')
            .map(|part| self.escape(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Opening quote character, used by the SQL tokenizer.
    pub fn quote_chars(self) -> (char, char) {
        match self {
            Self::MySql | Self::MariaDb | Self::Spanner => ('`', '`'),
            Self::MsSql => ('[', ']'),
            _ => ('"', '"'),
        }
    }

    /// Longest alias the backend accepts, if limited.
    pub fn max_alias_length(self) -> Option<usize> {
        match self {
            Self::Postgres | Self::CockroachDb | Self::MySql | Self::MariaDb => Some(63),
            Self::Oracle => Some(30),
            Self::SapHana => Some(127),
            Self::MsSql => Some(128),
            _ => None,
        }
    }

    /// Shorten an alias that exceeds [`Dialect::max_alias_length`].
    ///
    /// The result keeps a readable prefix and appends a stable hash so distinct
    /// long aliases never collapse onto the same short name.
    pub fn shorten_alias(self, alias: &str) -> String {
        let Some(max) = self.max_alias_length() else {
            return alias.to_string();
        };
        if alias.len() <= max {
            return alias.to_string();
        }
        let hash = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, alias.as_bytes()).simple().to_string();
        let suffix = &hash[..8];
        let mut prefix_len = max.saturating_sub(suffix.len() + 1);
        while !alias.is_char_boundary(prefix_len) {
            prefix_len -= 1;
        }
        format!("{}_{}", &alias[..prefix_len], suffix)
    }

    /// Build the alias of a selected column: `alias_column`.
    pub fn build_column_alias(self, alias: &str, column: &str) -> String {
        self.shorten_alias(&format!("{alias}_{column}"))
    }

    // ==================== Parameters ====================

    /// Placeholder for the parameter at zero-based `index`.
    pub fn create_parameter(self, index: usize) -> String {
        match self {
            Self::Postgres | Self::CockroachDb | Self::DuckDb => format!("${}", index + 1),
            Self::MsSql => format!("@{index}"),
            Self::Oracle => format!(":{}", index + 1),
            Self::Spanner => format!("@param{index}"),
            Self::MySql | Self::MariaDb | Self::Sqlite | Self::LibSql | Self::SapHana => "?".to_string(),
        }
    }

    /// Whether a repeated named parameter may reuse one placeholder.
    ///
    /// Positional `?` placeholders must be repeated with their value.
    pub fn reuses_placeholders(self) -> bool {
        !matches!(
            self,
            Self::MySql | Self::MariaDb | Self::Sqlite | Self::LibSql | Self::SapHana
        )
    }

    // ==================== Capabilities ====================

    pub fn returning_style(self) -> ReturningStyle {
        match self {
            Self::Postgres | Self::CockroachDb | Self::Sqlite | Self::LibSql | Self::DuckDb | Self::MariaDb => {
                ReturningStyle::Returning
            }
            Self::MsSql => ReturningStyle::Output,
            _ => ReturningStyle::None,
        }
    }

    /// Whether a returning/output clause is available for the given statement.
    pub fn is_returning_supported(self, kind: StatementKind) -> bool {
        match self.returning_style() {
            ReturningStyle::None => false,
            // MariaDB has INSERT ... RETURNING and DELETE ... RETURNING only
            _ if self == Self::MariaDb => kind != StatementKind::Update,
            _ => true,
        }
    }

    pub fn is_uuid_generation_supported(self) -> bool {
        matches!(self, Self::Postgres | Self::CockroachDb | Self::MsSql | Self::DuckDb)
    }

    pub fn upsert_style(self) -> UpsertStyle {
        match self {
            Self::Postgres | Self::CockroachDb | Self::Sqlite | Self::LibSql | Self::DuckDb => UpsertStyle::OnConflict,
            Self::MySql | Self::MariaDb => UpsertStyle::OnDuplicateKey,
            _ => UpsertStyle::Unsupported,
        }
    }

    /// `ON CONFLICT ... WHERE` comparison used to skip no-op updates.
    pub fn distinct_from(self, left: &str, right: &str) -> OrmResult<String> {
        if self.is_postgres_family() || self == Self::DuckDb {
            Ok(format!("{left} IS DISTINCT FROM {right}"))
        } else if self.is_sqlite_family() {
            Ok(format!("{left} IS NOT {right}"))
        } else {
            Err(OrmError::unsupported(self.name(), "skipping unchanged upsert rows"))
        }
    }

    /// Insert prefix that ignores conflicting rows (`INSERT IGNORE`, `INSERT OR IGNORE`).
    pub fn insert_ignore_keyword(self) -> Option<&'static str> {
        match self {
            Self::MySql | Self::MariaDb => Some("INSERT IGNORE"),
            Self::Sqlite | Self::LibSql => Some("INSERT OR IGNORE"),
            _ => None,
        }
    }

    /// Value written for a column omitted from one row of a bulk insert.
    pub fn default_keyword(self) -> &'static str {
        if self.is_sqlite_family() { "NULL" } else { "DEFAULT" }
    }

    /// Clause for an INSERT that supplies no column at all.
    pub fn empty_values_clause(self) -> &'static str {
        match self {
            Self::MySql | Self::MariaDb => "VALUES ()",
            Self::Oracle => "VALUES (DEFAULT)",
            _ => "DEFAULT VALUES",
        }
    }

    pub fn current_timestamp(self) -> &'static str {
        match self {
            Self::Sqlite | Self::LibSql => "datetime('now')",
            Self::Oracle => "SYSTIMESTAMP",
            Self::MsSql => "GETDATE()",
            _ => "CURRENT_TIMESTAMP",
        }
    }

    /// String concatenation of SQL expressions.
    pub fn concat(self, parts: &[String]) -> String {
        match self {
            Self::MySql | Self::MariaDb | Self::MsSql | Self::Spanner => format!("CONCAT({})", parts.join(", ")),
            _ => parts.join(" || "),
        }
    }

    /// Whether `ILIKE` exists; otherwise `UPPER(a) LIKE UPPER(b)` is used.
    pub fn supports_ilike(self) -> bool {
        self.is_postgres_family() || self == Self::DuckDb
    }

    /// Native array operators (`@>`, `<@`, `&&`, `= ANY`).
    pub fn supports_array_operators(self) -> bool {
        self.is_postgres_family() || self == Self::DuckDb
    }

    /// ORDER BY / LIMIT on UPDATE and DELETE.
    pub fn supports_update_limit(self) -> bool {
        self.is_mysql_family()
    }

    pub fn insert_id_strategy(self) -> InsertIdStrategy {
        match self {
            Self::MySql | Self::MariaDb => InsertIdStrategy::FirstOfBatch,
            Self::Sqlite | Self::LibSql => InsertIdStrategy::LastOfBatch,
            _ => InsertIdStrategy::None,
        }
    }

    /// Table required by `SELECT` without a real source.
    pub fn dual_table(self) -> Option<&'static str> {
        match self {
            Self::Oracle => Some("DUAL"),
            Self::SapHana => Some("DUMMY"),
            _ => None,
        }
    }

    // ==================== Pagination ====================

    /// LIMIT/OFFSET (or OFFSET/FETCH) suffix for a SELECT.
    ///
    /// `has_order_by` matters for SQL Server, where OFFSET requires an ORDER BY.
    pub fn pagination_clause(self, limit: Option<u64>, offset: Option<u64>, has_order_by: bool) -> OrmResult<String> {
        match self {
            Self::MsSql => {
                if limit.is_none() && offset.is_none() {
                    return Ok(String::new());
                }
                let mut sql = String::new();
                if !has_order_by {
                    sql.push_str(" ORDER BY (SELECT NULL)");
                }
                sql.push_str(&format!(" OFFSET {} ROWS", offset.unwrap_or(0)));
                if let Some(limit) = limit {
                    sql.push_str(&format!(" FETCH NEXT {limit} ROWS ONLY"));
                }
                Ok(sql)
            }
            Self::Oracle => Ok(match (limit, offset) {
                (None, None) => String::new(),
                (Some(l), None) => format!(" FETCH NEXT {l} ROWS ONLY"),
                (None, Some(o)) => format!(" OFFSET {o} ROWS"),
                (Some(l), Some(o)) => format!(" OFFSET {o} ROWS FETCH NEXT {l} ROWS ONLY"),
            }),
            _ => match (limit, offset) {
                (None, None) => Ok(String::new()),
                (Some(l), None) => Ok(format!(" LIMIT {l}")),
                (Some(l), Some(o)) => Ok(format!(" LIMIT {l} OFFSET {o}")),
                (None, Some(o)) => {
                    if self.is_sqlite_family() {
                        Ok(format!(" LIMIT -1 OFFSET {o}"))
                    } else if self.is_postgres_family() || self == Self::DuckDb {
                        Ok(format!(" OFFSET {o}"))
                    } else {
                        Err(OrmError::unsupported(self.name(), "OFFSET without LIMIT"))
                    }
                }
            },
        }
    }

    // ==================== Transactions ====================

    /// Statements that open a transaction at the given isolation level.
    pub fn start_transaction_sql(self, isolation: Option<TransactionIsolation>) -> Vec<String> {
        let set_isolation = isolation.map(|level| format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()));
        match self {
            Self::Postgres | Self::CockroachDb => {
                let mut statements = vec!["START TRANSACTION".to_string()];
                statements.extend(set_isolation);
                statements
            }
            Self::MySql | Self::MariaDb => {
                let mut statements: Vec<String> = set_isolation.into_iter().collect();
                statements.push("START TRANSACTION".to_string());
                statements
            }
            Self::Sqlite | Self::LibSql => {
                let mut statements = Vec::new();
                if isolation == Some(TransactionIsolation::ReadUncommitted) {
                    statements.push("PRAGMA read_uncommitted = true".to_string());
                }
                statements.push("BEGIN TRANSACTION".to_string());
                statements
            }
            Self::MsSql => {
                let mut statements: Vec<String> = set_isolation.into_iter().collect();
                statements.push("BEGIN TRANSACTION".to_string());
                statements
            }
            // Implicit transactions: the first statement opens one.
            Self::Oracle | Self::SapHana => set_isolation.into_iter().collect(),
            Self::DuckDb | Self::Spanner => vec!["BEGIN TRANSACTION".to_string()],
        }
    }

    pub fn commit_sql(self) -> &'static str {
        "COMMIT"
    }

    pub fn rollback_sql(self) -> &'static str {
        "ROLLBACK"
    }

    /// Whether nested transactions can be emulated with savepoints.
    pub fn supports_savepoints(self) -> bool {
        !matches!(self, Self::Spanner | Self::DuckDb)
    }

    pub fn create_savepoint_sql(self, name: &str) -> String {
        match self {
            Self::MsSql => format!("SAVE TRANSACTION {name}"),
            _ => format!("SAVEPOINT {name}"),
        }
    }

    /// `None` where savepoints are released implicitly.
    pub fn release_savepoint_sql(self, name: &str) -> Option<String> {
        match self {
            Self::MsSql | Self::Oracle => None,
            _ => Some(format!("RELEASE SAVEPOINT {name}")),
        }
    }

    pub fn rollback_to_savepoint_sql(self, name: &str) -> String {
        match self {
            Self::MsSql => format!("ROLLBACK TRANSACTION {name}"),
            _ => format!("ROLLBACK TO SAVEPOINT {name}"),
        }
    }

    // ==================== Locking ====================

    /// Translate a lock mode into this dialect's syntax.
    ///
    /// `tables` are already-escaped aliases for `FOR UPDATE OF ...`.
    pub fn lock_clause(self, mode: LockMode, tables: &[String], on_locked: Option<OnLocked>) -> OrmResult<LockClause> {
        lock::lock_clause(self, mode, tables, on_locked)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Dialect {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dialect = match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Self::Postgres,
            "cockroachdb" | "cockroach" => Self::CockroachDb,
            "mysql" => Self::MySql,
            "mariadb" => Self::MariaDb,
            "sqlite" | "better-sqlite3" => Self::Sqlite,
            "libsql" => Self::LibSql,
            "duckdb" => Self::DuckDb,
            "mssql" | "sqlserver" => Self::MsSql,
            "oracle" => Self::Oracle,
            "sap" | "hana" => Self::SapHana,
            "spanner" => Self::Spanner,
            other => return Err(OrmError::usage(format!("unknown dialect \"{other}\""))),
        };
        Ok(dialect)
    }
}
