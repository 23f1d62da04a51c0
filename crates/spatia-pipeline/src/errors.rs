//! Error types for the write pipeline

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors returned to the caller of a command.
///
/// Every variant is raised before the store is touched, so a failed command
/// never leaves a partial mutation behind.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("Malformed command: {0}")]
    Malformed(String),

    #[error("Object not found: {key} {id}")]
    NotFound { key: String, id: String },

    #[error("Type mismatch: field '{field}' expects a number, got '{value}'")]
    TypeMismatch { field: String, value: String },

    #[error("Store capacity exceeded: limit is {limit} objects")]
    CapacityExceeded { limit: usize },
}

impl PipelineError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Malformed(_) | Self::TypeMismatch { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::CapacityExceeded { .. } => 507,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "MALFORMED_COMMAND",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::TypeMismatch { .. } => "TYPE_MISMATCH",
            Self::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
        }
    }
}

/// Durable log errors. These are operational faults and never become
/// command failures.
#[derive(Debug, Error)]
pub enum AofError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt log entry at byte {offset}: {reason}")]
    Corrupt { offset: usize, reason: String },

    #[error("Replay failed at entry {index}: {source}")]
    Replay {
        index: usize,
        #[source]
        source: PipelineError,
    },
}
