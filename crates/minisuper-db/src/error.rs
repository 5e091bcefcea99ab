//! # Local Store Errors
//!
//! ```text
//!   CoreError / ValidationError ──► DbError::Domain     (caller's fault, nothing written)
//!   sqlx::Error (constraints)   ──► UniqueViolation / ConstraintViolation
//!   sqlx::Error (pool, io)      ──► Unavailable
//!   sqlx::Error (other)         ──► Query
//!   bad stored data             ──► Corrupt
//!
//!   DbError ──► SyncError::Database (minisuper-sync), CliError::Store (pos-cli)
//! ```

use minisuper_core::{CoreError, ValidationError};
use thiserror::Error;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    /// A business rule rejected the mutation. The transaction was rolled
    /// back and nothing was queued.
    #[error(transparent)]
    Domain(#[from] CoreError),

    #[error("{entity} {id} does not exist")]
    NotFound { entity: String, id: String },

    /// `UNIQUE constraint failed`, e.g. a second OPEN session for a user.
    #[error("{column} must be unique")]
    UniqueViolation { column: String },

    /// Foreign key or CHECK constraint.
    #[error("Constraint violated: {0}")]
    ConstraintViolation(String),

    /// Pool closed, timed out, or the file could not be opened.
    #[error("Local Store unavailable: {0}")]
    Unavailable(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Query failed: {0}")]
    Query(String),

    /// A row or queue payload that does not decode.
    #[error("Corrupt data: {0}")]
    Corrupt(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// True for input the caller must fix (never worth retrying).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DbError::Domain(CoreError::Validation(_))
                | DbError::UniqueViolation { .. }
                | DbError::ConstraintViolation(_)
        )
    }
}

impl From<ValidationError> for DbError {
    fn from(err: ValidationError) -> Self {
        DbError::Domain(CoreError::Validation(err))
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Corrupt(err.to_string())
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Row", "?"),
            sqlx::Error::Database(db_err) => {
                let message = db_err.message();
                match message.strip_prefix("UNIQUE constraint failed: ") {
                    Some(column) => DbError::UniqueViolation {
                        column: column.to_string(),
                    },
                    None if message.contains("constraint failed") => {
                        DbError::ConstraintViolation(message.to_string())
                    }
                    None => DbError::Query(message.to_string()),
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DbError::Unavailable(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DbError::Corrupt(err.to_string())
            }
            other => DbError::Query(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::Migration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        let err: DbError = ValidationError::required("code").into();
        assert!(err.is_validation());
        assert!(DbError::UniqueViolation {
            column: "products.code".into()
        }
        .is_validation());
        assert!(!DbError::Unavailable("pool closed".into()).is_validation());
    }

    #[test]
    fn test_domain_error_is_transparent() {
        let err: DbError = CoreError::InsufficientStock {
            code: "BEB001".to_string(),
            available: 2,
            requested: 3,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Insufficient stock for BEB001: available 2, requested 3"
        );
    }

    #[tokio::test]
    async fn test_unique_index_maps_to_violation() {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query("CREATE TABLE t (code TEXT UNIQUE)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO t VALUES ('A')").execute(&pool).await.unwrap();

        let err: DbError = sqlx::query("INSERT INTO t VALUES ('A')")
            .execute(&pool)
            .await
            .unwrap_err()
            .into();
        assert!(matches!(err, DbError::UniqueViolation { ref column } if column == "t.code"));
    }
}
