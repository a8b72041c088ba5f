//! Error types for growth standard ingestion

use thiserror::Error;

/// Result type alias for growth standard operations
pub type Result<T> = std::result::Result<T, GrowthError>;

/// Main error type for the growth workspace
#[derive(Error, Debug)]
pub enum GrowthError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Growth standard records failed validation: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Records collection is empty")]
    EmptyInput,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sink error: {0}")]
    Sink(String),
}
