//! Error types for the typedef registry

use thiserror::Error;

/// Result type for typedef operations
pub type Result<T> = std::result::Result<T, TypedefError>;

/// Typedef registry errors
#[derive(Error, Debug)]
pub enum TypedefError {
    /// A fieldset disagrees with what the target already knows. Callers reject
    /// the offending record or query.
    #[error("field definition mismatch with already defined fields")]
    DefinitionMismatch,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Caller bug: stale baseset reference or a pop at a non-retractable level.
    #[error("BUG: {0}")]
    Invariant(String),

    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("Target already exists: {0}")]
    TargetExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl TypedefError {
    /// Whether the caller may retry with corrected data.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TypedefError::DefinitionMismatch)
    }
}
