// Error types for orchestration

use thiserror::Error;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Model error
    #[error("Model error: {0}")]
    Model(#[from] pagesmith_abstraction::ModelError),

    /// Project store failure
    #[error("Project store error: {0}")]
    Store(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Orchestration cancelled
    #[error("Orchestration cancelled by user")]
    Cancelled,

    /// Other error
    #[error("Orchestration error: {0}")]
    Other(String),
}
