//! Error taxonomy for the data access layer.
//!
//! Two layers of errors live here:
//!
//! - [`EngineError`]: what the underlying SQL engine reported. It keeps the SQLSTATE code and the
//!   raw message so the failure can be logged with full detail.
//! - [`DbError`]: the public, engine-independent taxonomy returned to callers. Engine text never
//!   crosses this boundary; only the classified kind does.
//!
//! [`classify`] is the single place where the first is turned into the second.

use thiserror::Error;
use tracing::error;

/// SQLSTATE reported by PostgreSQL for a unique constraint violation
pub const PG_UNIQUE_VIOLATION: &str = "23505";
/// SQLSTATE reported by PostgreSQL for a check constraint violation
pub const PG_CHECK_VIOLATION: &str = "23514";
/// SQLSTATE reported by PostgreSQL for a foreign key constraint violation
pub const PG_FOREIGN_KEY_VIOLATION: &str = "23503";

/// Errors returned by every public operation of the data access layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// The call context was not supplied
    #[error("context is required")]
    ContextRequired,

    /// The record type does not name a table
    #[error("model is required")]
    ModelRequired,

    /// An update was requested with an empty update set
    #[error("updates are required")]
    UpdatesRequired,

    /// The operation needs a non-empty condition to select rows
    #[error("condition is required")]
    ConditionRequired,

    /// A raw query was blank
    #[error("query is required")]
    QueryRequired,

    /// A join query did not name its base table
    #[error("base table is required")]
    BaseTableRequired,

    /// A join query had no join clauses
    #[error("at least one join is required")]
    JoinsRequired,

    /// Unique constraint violation
    #[error("a record with the same values already exists")]
    DuplicateRecord,

    /// Check constraint violation
    #[error("the provided data violates database constraints")]
    ConstraintViolation,

    /// Foreign key constraint violation
    #[error("invalid reference in the provided data")]
    InvalidReference,

    /// Catch-all for engine failures; the detail is only logged
    #[error("an unexpected database error occurred")]
    Database,

    /// The unit of work of a transaction panicked; the transaction was rolled back
    #[error("transaction panic: {0}")]
    TransactionAborted(String),

    /// A record could not be converted to or from its row representation
    #[error("record encoding failed: {0}")]
    Encoding(String),
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Encoding(err.to_string())
    }
}

/// Type alias for data access results
pub type Result<T> = std::result::Result<T, DbError>;

/// Failures reported by an [`Engine`](crate::db::engine::Engine) implementation.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine found no row where exactly one was expected
    #[error("no rows returned")]
    RowNotFound,

    /// The database rejected the statement
    #[error("{message}")]
    Database {
        /// SQLSTATE code, when the engine reported one
        code: Option<String>,
        constraint: Option<String>,
        message: String,
    },

    /// The call context was cancelled while the statement was in flight
    #[error("statement cancelled by caller")]
    Cancelled,

    /// The call context deadline passed while the statement was in flight
    #[error("statement deadline exceeded")]
    DeadlineExceeded,

    /// Anything else: connection loss, protocol errors, decoding failures
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Build a database error carrying only a SQLSTATE code and message.
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Database {
            code: Some(code.into()),
            constraint: None,
            message: message.into(),
        }
    }

    /// The SQLSTATE code of a database error.
    pub fn code(&self) -> Option<&str> {
        match self {
            EngineError::Database { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// Convert from sqlx::Error using sqlx's own error categorization
#[cfg(feature = "postgres")]
impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => EngineError::RowNotFound,
            sqlx::Error::Database(db_err) => EngineError::Database {
                code: db_err.code().map(|c| c.into_owned()),
                constraint: db_err.constraint().map(|s| s.to_string()),
                message: db_err.message().to_string(),
            },
            other => EngineError::Other(anyhow::Error::from(other)),
        }
    }
}

/// Translate an engine failure into the public taxonomy.
///
/// Returns `None` when the engine only reported that no row matched: absence is an outcome, not
/// a failure. Every other error is logged under `step` before being classified.
pub fn classify(err: EngineError, step: &str, message: &str) -> Option<DbError> {
    if matches!(err, EngineError::RowNotFound) {
        return None;
    }

    match &err {
        EngineError::Database { code, constraint, .. } => {
            error!(step, code = ?code, constraint = ?constraint, error = %err, "{message}");
        }
        _ => error!(step, error = %err, "{message}"),
    }

    let kind = match err.code() {
        Some(PG_UNIQUE_VIOLATION) => DbError::DuplicateRecord,
        Some(PG_CHECK_VIOLATION) => DbError::ConstraintViolation,
        Some(PG_FOREIGN_KEY_VIOLATION) => DbError::InvalidReference,
        _ => DbError::Database,
    };
    Some(kind)
}

/// Classify a failure of an operation for which "no rows" is not a meaningful outcome.
pub(crate) fn failure(err: EngineError, step: &str, message: &str) -> DbError {
    classify(err, step, message).unwrap_or(DbError::Database)
}

/// Classify `err`, turning "no rows" into `Ok(absent)`.
pub(crate) fn resolve<T>(err: EngineError, step: &str, message: &str, absent: T) -> Result<T> {
    match classify(err, step, message) {
        None => Ok(absent),
        Some(kind) => Err(kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_is_not_an_error() {
        assert_eq!(classify(EngineError::RowNotFound, "finding single record", "Failed"), None);
    }

    #[test]
    fn constraint_codes_map_to_domain_kinds() {
        let cases = [
            (PG_UNIQUE_VIOLATION, DbError::DuplicateRecord),
            (PG_CHECK_VIOLATION, DbError::ConstraintViolation),
            (PG_FOREIGN_KEY_VIOLATION, DbError::InvalidReference),
            ("42P01", DbError::Database),
        ];

        for (code, expected) in cases {
            let err = EngineError::with_code(code, "duplicate key value violates unique constraint \"users_email_key\"");
            assert_eq!(classify(err, "creating record", "Failed to create record"), Some(expected));
        }
    }

    #[test]
    fn engine_text_does_not_leak() {
        let err = EngineError::with_code(PG_UNIQUE_VIOLATION, "Key (email)=(a@example.com) already exists.");
        let classified = classify(err, "creating record", "Failed to create record").unwrap();
        assert!(!classified.to_string().contains("a@example.com"));
        assert_eq!(classified.to_string(), "a record with the same values already exists");
    }

    #[test]
    fn non_database_failures_are_opaque() {
        let err = EngineError::Other(anyhow::anyhow!("connection reset by peer"));
        assert_eq!(classify(err, "counting records", "Failed"), Some(DbError::Database));
        assert_eq!(classify(EngineError::Cancelled, "counting records", "Failed"), Some(DbError::Database));
    }

    #[test]
    fn resolve_returns_absent_value_for_not_found() {
        assert_eq!(resolve(EngineError::RowNotFound, "step", "msg", 0_i64), Ok(0));
        assert_eq!(
            resolve(EngineError::with_code(PG_FOREIGN_KEY_VIOLATION, "fk"), "step", "msg", 0_i64),
            Err(DbError::InvalidReference)
        );
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn sqlx_row_not_found_converts() {
        assert!(matches!(EngineError::from(sqlx::Error::RowNotFound), EngineError::RowNotFound));
        assert!(matches!(EngineError::from(sqlx::Error::PoolTimedOut), EngineError::Other(_)));
    }
}
