//! Core error types for RETRACE.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Validation error
    Validation {
        /// Field that failed validation
        field: String,
        /// Why it failed
        reason: String,
    },

    /// Not found
    NotFound {
        /// Kind of entity
        kind: String,
        /// Entity id
        id: String,
    },

    /// Capacity exceeded
    CapacityExceeded {
        /// Resource that ran out
        resource: String,
        /// Configured limit
        limit: u64,
    },

    /// Cancelled
    Cancelled,

    /// Storage collaborator failure
    Storage {
        /// Failure description
        reason: String,
    },

    /// Internal error (for unexpected errors)
    Internal {
        /// Error message
        message: String,
    },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { field, reason } => {
                write!(f, "Validation failed for {}: {}", field, reason)
            }
            Self::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
            Self::CapacityExceeded { resource, limit } => {
                write!(f, "Capacity exceeded for {}: {}", resource, limit)
            }
            Self::Cancelled => write!(f, "Operation cancelled"),
            Self::Storage { reason } => write!(f, "Storage error: {}", reason),
            Self::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal {
            message: format!("JSON encoding failed: {}", err),
        }
    }
}
