//! Error types for the Warden permission engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WardenError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Business rule '{rule}' violated: {detail}")]
    BusinessRule { rule: String, detail: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Access forbidden: {reason}")]
    Forbidden { reason: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WardenError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Name of the broken business rule, if this is a rule violation.
    pub fn rule_name(&self) -> Option<&str> {
        match self {
            Self::BusinessRule { rule, .. } => Some(rule),
            _ => None,
        }
    }

    /// Storage failures are transient from the caller's point of view.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

pub type WardenResult<T> = Result<T, WardenError>;
