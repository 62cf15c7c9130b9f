//! Database-specific error types and conversions.

use std::time::Duration;

use surrealdb::IndexedResults;
use surrealdb_types::QueryError;
use tooltrack_core::error::TrackerError;

/// Attempts made for a statement that keeps hitting transaction
/// conflicts before the conflict is reported as a database error.
pub(crate) const MAX_CONFLICT_RETRIES: u32 = 10;

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Migration integrity violation: {0}")]
    Integrity(String),

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Malformed {entity} record: {message}")]
    Decode {
        entity: &'static str,
        message: String,
    },
}

impl DbError {
    pub(crate) fn decode(entity: &'static str, message: impl Into<String>) -> Self {
        Self::Decode {
            entity,
            message: message.into(),
        }
    }
}

impl From<DbError> for TrackerError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => TrackerError::NotFound { entity, id },
            DbError::Integrity(msg) => TrackerError::MigrationIntegrity(msg),
            other => TrackerError::Database(other.to_string()),
        }
    }
}

/// Whether `err` was raised by the unique index named `index`.
///
/// The engine reports the violation as
/// "Database index `<index>` already contains <value>, with record `<id>`".
pub(crate) fn is_unique_violation(err: &surrealdb::Error, index: &str) -> bool {
    err.message()
        .contains(&format!("index `{index}` already contains"))
}

/// Whether `err` is an optimistic-concurrency conflict that the engine
/// reports as safe to retry.
pub(crate) fn is_retryable_conflict(err: &surrealdb::Error) -> bool {
    matches!(err.query_details(), Some(QueryError::TransactionConflict))
        || err.message().contains("can be retried")
}

/// Short, growing pause between conflict retries.
pub(crate) async fn conflict_backoff(attempt: u32) {
    tokio::time::sleep(Duration::from_millis(2 * u64::from(attempt + 1))).await;
}

/// Why a `BEGIN ... COMMIT` batch did not apply.
///
/// Statements skipped because the transaction failed are dropped, so
/// only the statement that failed (or the `COMMIT` that conflicted)
/// remains.
#[derive(Debug)]
pub(crate) struct TxFailure {
    errors: Vec<surrealdb::Error>,
}

impl TxFailure {
    /// Split a transaction's response into its results or its failure.
    pub(crate) fn check(
        outcome: Result<IndexedResults, surrealdb::Error>,
    ) -> Result<IndexedResults, TxFailure> {
        let mut response = outcome.map_err(|e| TxFailure { errors: vec![e] })?;

        let mut errors: Vec<(usize, surrealdb::Error)> =
            response.take_errors().into_iter().collect();
        if errors.is_empty() {
            return Ok(response);
        }
        errors.sort_by_key(|(index, _)| *index);

        let (skipped, causes): (Vec<_>, Vec<_>) = errors
            .into_iter()
            .map(|(_, e)| e)
            .partition(|e| matches!(e.query_details(), Some(QueryError::NotExecuted)));
        let errors = if causes.is_empty() { skipped } else { causes };
        Err(TxFailure { errors })
    }

    /// Whether the batch was aborted by `THROW '<marker>'`.
    pub(crate) fn thrown(&self, marker: &str) -> bool {
        self.errors
            .iter()
            .any(|e| e.is_thrown() && e.message().ends_with(marker))
    }

    pub(crate) fn violates(&self, index: &str) -> bool {
        self.errors.iter().any(|e| is_unique_violation(e, index))
    }

    pub(crate) fn is_retryable(&self) -> bool {
        self.errors.iter().any(is_retryable_conflict)
    }
}

impl From<TxFailure> for DbError {
    fn from(failure: TxFailure) -> Self {
        match failure.errors.into_iter().next() {
            Some(err) => DbError::Surreal(err),
            None => DbError::Migration("transaction failed without an error".into()),
        }
    }
}
