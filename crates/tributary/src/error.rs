//! Error types for the scrape, provenance and backlink layers.

use std::io;
use thiserror::Error;

/// Result type for Tributary operations
pub type Result<T> = std::result::Result<T, TributaryError>;

#[derive(Error, Debug)]
pub enum TributaryError {
    /// Integration not configured, or a config is missing required fields.
    /// Fatal: returned before any config runs.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Network or API failure for a single remote item.
    #[error("Transient fetch error for {id}: {message}")]
    TransientFetch { id: String, message: String },

    /// The remote id no longer exists.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad input rejected at the call boundary.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Database(#[from] tributary_db::DbError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    TomlWrite(#[from] toml::ser::Error),
}

impl TributaryError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Item-level failures that a run records and moves past.
    pub fn is_item_level(&self) -> bool {
        matches!(self, Self::TransientFetch { .. } | Self::NotFound(_))
    }
}
