//! Error types for the contention engine.
//!
//! Two layers, matching the two phases of the process:
//!
//! - [`BootstrapError`]: connecting and initializing the schema. These are fatal
//!   and stop the process before any generator starts.
//! - [`ScenarioError`]: everything a generator cycle can run into. These are
//!   always handled inside the cycle that produced them; they are logged, the
//!   open transaction is rolled back and the generator moves on to cooldown.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while connecting to the database or preparing its schema.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Could not build the pool or reach the server
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: sqlx::Error,
    },

    /// A schema statement failed
    #[error("failed to create {statement}: {source}")]
    Schema {
        statement: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// Seeding a table failed
    #[error("failed to seed {table}: {source}")]
    Seed {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

/// What a failed statement tells us, keyed off the Postgres SQLSTATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementFailure {
    /// `40P01`: this transaction was chosen as the deadlock victim
    Deadlock,
    /// `40001`
    SerializationFailure,
    /// `55P03`: `NOWAIT` or `lock_timeout` gave up on a row lock
    LockNotAvailable,
    /// `57014`: statement_timeout or a cancel request
    QueryCanceled,
    /// `23505`
    UniqueViolation,
    Other,
}

impl StatementFailure {
    /// Classify a five-character SQLSTATE code.
    pub fn from_sqlstate(code: &str) -> Self {
        match code {
            "40P01" => StatementFailure::Deadlock,
            "40001" => StatementFailure::SerializationFailure,
            "55P03" => StatementFailure::LockNotAvailable,
            "57014" => StatementFailure::QueryCanceled,
            "23505" => StatementFailure::UniqueViolation,
            _ => StatementFailure::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementFailure::Deadlock => "deadlock",
            StatementFailure::SerializationFailure => "serialization_failure",
            StatementFailure::LockNotAvailable => "lock_not_available",
            StatementFailure::QueryCanceled => "query_canceled",
            StatementFailure::UniqueViolation => "unique_violation",
            StatementFailure::Other => "statement",
        }
    }
}

impl fmt::Display for StatementFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors a scenario cycle can produce.
///
/// Each variant carries the name of the operation that failed so a single log
/// line is enough to tell which scenario step went wrong.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// Could not get a connection or begin a transaction
    #[error("pool error during {operation}: {source}")]
    Pool {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// A query or exec was rejected by the server
    #[error("{operation} failed ({kind}): {source}")]
    Statement {
        operation: &'static str,
        kind: StatementFailure,
        #[source]
        source: sqlx::Error,
    },

    /// A result row did not have the expected shape
    #[error("could not decode result of {operation}: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// A deadline-bound operation ran past its deadline
    #[error("{operation} exceeded its deadline of {deadline:?}")]
    Timeout {
        operation: &'static str,
        deadline: Duration,
    },

    /// A lock-guarded update found its guard row changed underneath it
    #[error("update of user {user_id} lost its row lock")]
    StaleLock { user_id: i32 },

    /// The engine is shutting down
    #[error("scenario cancelled")]
    Cancelled,
}

impl ScenarioError {
    /// Wrap a sqlx error, sorting it into the pool/statement/decode buckets.
    pub fn from_sqlx(operation: &'static str, source: sqlx::Error) -> Self {
        match &source {
            sqlx::Error::Database(db) => {
                let kind = db
                    .code()
                    .map(|code| StatementFailure::from_sqlstate(&code))
                    .unwrap_or(StatementFailure::Other);
                ScenarioError::Statement {
                    operation,
                    kind,
                    source,
                }
            }
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnIndexOutOfBounds { .. }
            | sqlx::Error::TypeNotFound { .. } => ScenarioError::Decode { operation, source },
            sqlx::Error::RowNotFound => ScenarioError::Statement {
                operation,
                kind: StatementFailure::Other,
                source,
            },
            _ => ScenarioError::Pool { operation, source },
        }
    }

    /// Stable label used in log fields and metric names.
    pub fn kind(&self) -> &'static str {
        match self {
            ScenarioError::Pool { .. } => "pool",
            ScenarioError::Statement { kind, .. } => kind.as_str(),
            ScenarioError::Decode { .. } => "decode",
            ScenarioError::Timeout { .. } => "timeout",
            ScenarioError::StaleLock { .. } => "stale_lock",
            ScenarioError::Cancelled => "cancelled",
        }
    }

    /// Returns the statement classification, if this is a statement error.
    pub fn statement_failure(&self) -> Option<StatementFailure> {
        match self {
            ScenarioError::Statement { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_deadlock(&self) -> bool {
        self.statement_failure() == Some(StatementFailure::Deadlock)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScenarioError::Cancelled)
    }
}

/// Attach an operation name while converting `sqlx::Error`.
pub trait SqlxResultExt<T> {
    fn during(self, operation: &'static str) -> Result<T, ScenarioError>;
}

impl<T> SqlxResultExt<T> for Result<T, sqlx::Error> {
    fn during(self, operation: &'static str) -> Result<T, ScenarioError> {
        self.map_err(|e| ScenarioError::from_sqlx(operation, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlstate_classification() {
        assert_eq!(
            StatementFailure::from_sqlstate("40P01"),
            StatementFailure::Deadlock
        );
        assert_eq!(
            StatementFailure::from_sqlstate("55P03"),
            StatementFailure::LockNotAvailable
        );
        assert_eq!(
            StatementFailure::from_sqlstate("57014"),
            StatementFailure::QueryCanceled
        );
        assert_eq!(
            StatementFailure::from_sqlstate("42P01"),
            StatementFailure::Other
        );
    }

    #[test]
    fn test_pool_errors_are_classified_as_pool() {
        let err = ScenarioError::from_sqlx("begin", sqlx::Error::PoolTimedOut);
        assert_eq!(err.kind(), "pool");
        assert!(!err.is_deadlock());
        assert!(err.to_string().contains("begin"));
    }

    #[test]
    fn test_decode_errors_are_classified_as_decode() {
        let err = ScenarioError::from_sqlx(
            "scan aggregation row",
            sqlx::Error::ColumnNotFound("hour".to_string()),
        );
        assert_eq!(err.kind(), "decode");
    }

    #[test]
    fn test_timeout_message_names_operation() {
        let err = ScenarioError::Timeout {
            operation: "hourly aggregation",
            deadline: Duration::from_secs(45),
        };
        assert_eq!(err.kind(), "timeout");
        assert_eq!(
            err.to_string(),
            "hourly aggregation exceeded its deadline of 45s"
        );
    }
}
