//! Error types for polyorm

use std::time::Duration;

use thiserror::Error;

use crate::value::Value;

/// Result type alias for polyorm operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for query building and execution
#[derive(Debug, Error)]
pub enum OrmError {
    // ==================== Usage ====================
    /// Query compiled without a main alias (`from()` was never called)
    #[error("Cannot build query: main alias is not set (call from() first)")]
    MissingMainAlias,

    /// Alias name already registered on this builder
    #[error("Alias \"{0}\" is already used in this query")]
    DuplicateAlias(String),

    /// Relation builder operation used against an incompatible relation kind
    #[error("Cannot use {operation}() on {kind} relation {entity}.{property}")]
    RelationCardinality {
        operation: &'static str,
        kind: &'static str,
        entity: String,
        property: String,
    },

    /// `.returning()` requested on a dialect without RETURNING/OUTPUT
    #[error("RETURNING is not supported by {dialect} for {statement} statements")]
    ReturningNotSupported {
        dialect: &'static str,
        statement: &'static str,
    },

    /// Pessimistic lock requested outside a transaction
    #[error("Pessimistic locks require an active transaction")]
    PessimisticLockTransactionRequired,

    /// UPDATE executed without SET values
    #[error("Cannot perform update query because update values are not defined")]
    UpdateValuesMissing,

    /// INSERT executed without VALUES
    #[error("Cannot perform insert query because values are not defined")]
    InsertValuesMissing,

    /// Soft delete/restore on an entity without a delete-date column
    #[error("Entity {0} has no delete date column")]
    MissingDeleteDateColumn(String),

    /// Generic misuse of the API
    #[error("Usage error: {0}")]
    Usage(String),

    // ==================== Resolution ====================
    /// Property path does not resolve to any column
    #[error("No column \"{path}\" found in entity {entity}")]
    ColumnNotFound { entity: String, path: String },

    /// Entity passed where identifiers are needed has no primary key values
    #[error("Cannot resolve primary key of {entity} entity")]
    EntityIdMissing { entity: String },

    /// Named parameter referenced in SQL but never set
    #[error("Parameter \"{name}\" is referenced but has no value")]
    ParameterNotFound { name: String },

    /// No metadata registered for an entity target
    #[error("No metadata for \"{0}\" was found")]
    MetadataNotFound(String),

    // ==================== Concurrency ====================
    /// Optimistic lock verification failed after load
    #[error(
        "The optimistic lock on entity {entity} failed, version {expected} was expected, but is actually {actual}"
    )]
    OptimisticLockVersionMismatch {
        entity: String,
        expected: String,
        actual: String,
    },

    /// `start_transaction` while a transaction is active and savepoints are unavailable
    #[error("Transaction already started for the given connection, commit current transaction before starting a new one")]
    TransactionAlreadyStarted,

    /// Commit/rollback without an active transaction
    #[error("Transaction is not started yet, start transaction before committing or rolling it back")]
    TransactionNotStarted,

    /// Query issued on a released runner
    #[error("Query runner already released. Cannot run queries anymore")]
    QueryRunnerAlreadyReleased,

    // ==================== Execution ====================
    /// Driver failure, wrapped with the statement and its parameters
    #[error("Query failed: {message}\n  sql: {sql}\n  params: {params:?}")]
    Query {
        sql: String,
        params: Vec<Value>,
        message: String,
        transient: bool,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Pool error
    #[error("Pool error: {0}")]
    Pool(String),

    /// Query timeout error
    #[error("Query timeout after {0:?}")]
    Timeout(Duration),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// More rows than expected
    #[error("Expected at most one row, got {0}")]
    TooManyRows(usize),

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Retry loop or query aborted by the owning runner
    #[error("Aborted: {0}")]
    Aborted(String),

    // ==================== Dialect ====================
    /// Operation not expressible on the active dialect
    #[error("{feature} is not supported by {dialect}")]
    DialectUnsupported {
        dialect: &'static str,
        feature: String,
    },

    /// Lock mode not available on the active dialect
    #[error("Lock mode {mode} is not supported by {dialect}")]
    LockNotSupported {
        dialect: &'static str,
        mode: &'static str,
    },

    /// Optimistic lock on an entity without version or update date column
    #[error("Cannot use optimistic lock on {0}: it has neither a version nor an update date column")]
    OptimisticLockCannotBeUsed(String),

    // ==================== Side channel ====================
    /// The original failure, with the rollback that failed while cleaning up after it
    #[error("{cause} (rollback failed: {rollback})")]
    RollbackFailed {
        cause: Box<OrmError>,
        rollback: Box<OrmError>,
    },
}

impl OrmError {
    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a usage error
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Create a dialect capability error
    pub fn unsupported(dialect: &'static str, feature: impl Into<String>) -> Self {
        Self::DialectUnsupported {
            dialect,
            feature: feature.into(),
        }
    }

    /// Create a column resolution error
    pub fn column_not_found(entity: impl Into<String>, path: impl Into<String>) -> Self {
        Self::ColumnNotFound {
            entity: entity.into(),
            path: path.into(),
        }
    }

    /// Wrap a driver failure that is not tied to a statement yet.
    ///
    /// The query runner attaches SQL and parameters via [`OrmError::with_statement`].
    pub fn driver<E>(err: E, transient: bool) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Query {
            sql: String::new(),
            params: Vec::new(),
            message: err.to_string(),
            transient,
            source: Some(Box::new(err)),
        }
    }

    /// Attach the offending statement to a query error.
    ///
    /// Errors of other kinds pass through untouched.
    pub fn with_statement(self, sql: &str, params: &[Value]) -> Self {
        match self {
            Self::Query {
                sql: existing,
                message,
                transient,
                source,
                ..
            } if existing.is_empty() => Self::Query {
                sql: sql.to_string(),
                params: params.to_vec(),
                message,
                transient,
                source,
            },
            other => other,
        }
    }

    /// Attach a failed rollback to the error that triggered it.
    pub fn with_rollback_failure(self, rollback: OrmError) -> Self {
        Self::RollbackFailed {
            cause: Box::new(self),
            rollback: Box::new(rollback),
        }
    }

    /// Copy of a deferred builder error, returned every time the builder is compiled.
    ///
    /// Driver sources are not cloneable and are dropped; builders never hold those.
    pub(crate) fn replicate(&self) -> OrmError {
        match self {
            Self::MissingMainAlias => Self::MissingMainAlias,
            Self::DuplicateAlias(name) => Self::DuplicateAlias(name.clone()),
            Self::RelationCardinality {
                operation,
                kind,
                entity,
                property,
            } => Self::RelationCardinality {
                operation: *operation,
                kind: *kind,
                entity: entity.clone(),
                property: property.clone(),
            },
            Self::ReturningNotSupported { dialect, statement } => Self::ReturningNotSupported {
                dialect: *dialect,
                statement: *statement,
            },
            Self::PessimisticLockTransactionRequired => Self::PessimisticLockTransactionRequired,
            Self::UpdateValuesMissing => Self::UpdateValuesMissing,
            Self::InsertValuesMissing => Self::InsertValuesMissing,
            Self::MissingDeleteDateColumn(entity) => Self::MissingDeleteDateColumn(entity.clone()),
            Self::Usage(message) => Self::Usage(message.clone()),
            Self::ColumnNotFound { entity, path } => Self::ColumnNotFound {
                entity: entity.clone(),
                path: path.clone(),
            },
            Self::EntityIdMissing { entity } => Self::EntityIdMissing { entity: entity.clone() },
            Self::ParameterNotFound { name } => Self::ParameterNotFound { name: name.clone() },
            Self::MetadataNotFound(target) => Self::MetadataNotFound(target.clone()),
            Self::OptimisticLockVersionMismatch {
                entity,
                expected,
                actual,
            } => Self::OptimisticLockVersionMismatch {
                entity: entity.clone(),
                expected: expected.clone(),
                actual: actual.clone(),
            },
            Self::TransactionAlreadyStarted => Self::TransactionAlreadyStarted,
            Self::TransactionNotStarted => Self::TransactionNotStarted,
            Self::QueryRunnerAlreadyReleased => Self::QueryRunnerAlreadyReleased,
            Self::Query {
                sql,
                params,
                message,
                transient,
                ..
            } => Self::Query {
                sql: sql.clone(),
                params: params.clone(),
                message: message.clone(),
                transient: *transient,
                source: None,
            },
            Self::Connection(message) => Self::Connection(message.clone()),
            Self::Pool(message) => Self::Pool(message.clone()),
            Self::Timeout(duration) => Self::Timeout(*duration),
            Self::NotFound(message) => Self::NotFound(message.clone()),
            Self::TooManyRows(count) => Self::TooManyRows(*count),
            Self::Decode { column, message } => Self::Decode {
                column: column.clone(),
                message: message.clone(),
            },
            Self::Serialization(message) => Self::Serialization(message.clone()),
            Self::Aborted(message) => Self::Aborted(message.clone()),
            Self::DialectUnsupported { dialect, feature } => Self::DialectUnsupported {
                dialect: *dialect,
                feature: feature.clone(),
            },
            Self::LockNotSupported { dialect, mode } => Self::LockNotSupported {
                dialect: *dialect,
                mode: *mode,
            },
            Self::OptimisticLockCannotBeUsed(entity) => Self::OptimisticLockCannotBeUsed(entity.clone()),
            Self::RollbackFailed { cause, rollback } => Self::RollbackFailed {
                cause: Box::new(cause.replicate()),
                rollback: Box::new(rollback.replicate()),
            },
        }
    }

    /// The error that started the failure chain, skipping rollback side channels.
    pub fn root_cause(&self) -> &OrmError {
        match self {
            Self::RollbackFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// The rollback failure attached to this error, if any
    pub fn rollback_failure(&self) -> Option<&OrmError> {
        match self {
            Self::RollbackFailed { rollback, .. } => Some(rollback),
            _ => None,
        }
    }

    /// SQL attached to an execution error
    pub fn sql(&self) -> Option<&str> {
        match self.root_cause() {
            Self::Query { sql, .. } => Some(sql),
            _ => None,
        }
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), Self::NotFound(_))
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self.root_cause(), Self::Timeout(_))
    }

    /// Check if this is an optimistic lock mismatch
    pub fn is_version_mismatch(&self) -> bool {
        matches!(self.root_cause(), Self::OptimisticLockVersionMismatch { .. })
    }

    /// Programmer-misuse errors that never reach the database
    pub fn is_usage(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::MissingMainAlias
                | Self::DuplicateAlias(_)
                | Self::RelationCardinality { .. }
                | Self::ReturningNotSupported { .. }
                | Self::PessimisticLockTransactionRequired
                | Self::UpdateValuesMissing
                | Self::InsertValuesMissing
                | Self::MissingDeleteDateColumn(_)
                | Self::Usage(_)
        )
    }

    /// Lock contention and serialization failures that are safe to retry
    /// for a single statement.
    pub fn is_transient(&self) -> bool {
        matches!(self.root_cause(), Self::Query { transient: true, .. })
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "pool")]
impl From<deadpool_postgres::PoolError> for OrmError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_failure_keeps_root_cause() {
        let err = OrmError::not_found("user 7")
            .with_rollback_failure(OrmError::Connection("socket closed".into()));

        assert!(err.is_not_found());
        assert!(matches!(err.root_cause(), OrmError::NotFound(_)));
        assert!(matches!(
            err.rollback_failure(),
            Some(OrmError::Connection(_))
        ));
        assert_eq!(
            err.to_string(),
            "Not found: user 7 (rollback failed: Connection error: socket closed)"
        );
    }

    #[test]
    fn test_with_statement_only_fills_empty_sql() {
        let io = std::io::Error::other("database is locked");
        let err = OrmError::driver(io, true).with_statement("SELECT 1", &[Value::Int(1)]);
        assert_eq!(err.sql(), Some("SELECT 1"));
        assert!(err.is_transient());

        let again = err.with_statement("SELECT 2", &[]);
        assert_eq!(again.sql(), Some("SELECT 1"));
    }

    #[test]
    fn test_usage_classification() {
        assert!(OrmError::MissingMainAlias.is_usage());
        assert!(OrmError::UpdateValuesMissing.is_usage());
        assert!(!OrmError::TransactionNotStarted.is_usage());
    }
}
