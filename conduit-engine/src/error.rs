//! Error types for the workflow engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised while configuring, expanding or running workflow tasks
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or incomplete job definition
    #[error("validation failed: {0}")]
    Validation(String),

    /// Illegal cross-job reference or license violation
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Referenced upstream job or output missing at expansion time
    #[error("dependency error: {0}")]
    Dependency(String),

    /// Cluster, registry, store or other collaborator unreachable
    #[error("infrastructure error: {0:#}")]
    Infrastructure(#[from] anyhow::Error),

    /// Readiness not achieved within budget
    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the task's current state
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn dependency(message: impl Into<String>) -> Self {
        Self::Dependency(message.into())
    }

    pub fn infrastructure(message: impl std::fmt::Display) -> Self {
        Self::Infrastructure(anyhow::anyhow!("{}", message))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Errors a caller can fix by changing its request
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Configuration(_) | Self::Dependency(_)
        )
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("malformed spec: {err}"))
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Validation(format!("malformed yaml: {err}"))
    }
}
