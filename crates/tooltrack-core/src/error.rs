//! Error types for the tooltrack domain.
//!
//! Every failure a caller can branch on has its own variant; storage
//! faults collapse into [`TrackerError::Database`].

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("A person named '{name}' already exists for this tenant")]
    DuplicateName { name: String },

    #[error("Tool {tool_id} is already lent out")]
    ToolAlreadyLent { tool_id: Uuid },

    #[error("Tool {tool_id} has no open loan")]
    NoOpenLoan { tool_id: Uuid },

    #[error("{entity} {id} belongs to another tenant")]
    CrossTenant { entity: String, id: String },

    #[error("Person {person_id} is referenced by {loans} loan record(s)")]
    HasLoans { person_id: Uuid, loans: u64 },

    #[error("Tool {tool_id} cannot be deleted while it is lent out")]
    ToolLentOut { tool_id: Uuid },

    #[error("Invalid date: {message}")]
    InvalidDate { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Migration integrity violation: {0}")]
    MigrationIntegrity(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Image storage error: {0}")]
    Image(String),
}

impl TrackerError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn invalid_date(message: impl Into<String>) -> Self {
        Self::InvalidDate {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
