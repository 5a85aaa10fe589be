//! Error types for the state store.

use thiserror::Error;

/// Database operation result type.
pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Error, Debug)]
pub enum DbError {
    /// SQLx error (connection, query, transaction)
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Constraint violation (unique key, bad column value)
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// A stored row could not be decoded into its domain type
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }
}

impl From<tributary_ids::IdParseError> for DbError {
    fn from(err: tributary_ids::IdParseError) -> Self {
        Self::Corrupt(err.to_string())
    }
}
