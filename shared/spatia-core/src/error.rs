//! Error types for Spatia services

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SpatiaError>;

#[derive(Error, Debug)]
pub enum SpatiaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient storage: {0}")]
    Capacity(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SpatiaError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Capacity(_) => 507,
            Self::Unavailable(_) => 503,
            _ => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Network(_) => "NETWORK_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Capacity(_) => "CAPACITY_EXCEEDED",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<std::io::Error> for SpatiaError {
    fn from(err: std::io::Error) -> Self {
        SpatiaError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(SpatiaError::Validation("bad".into()).status_code(), 400);
        assert_eq!(SpatiaError::Capacity("full".into()).status_code(), 507);
        assert_eq!(SpatiaError::Config("x".into()).status_code(), 500);
        assert_eq!(SpatiaError::NotFound("hook".into()).error_code(), "NOT_FOUND");
    }

    #[test]
    fn test_io_errors_are_storage_errors() {
        let err: SpatiaError = std::io::Error::new(std::io::ErrorKind::Other, "disk full").into();
        assert!(matches!(err, SpatiaError::Storage(msg) if msg.contains("disk full")));
    }
}
