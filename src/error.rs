//! Error types for quizpool
//!
//! Centralized error handling using thiserror. Provider failures have their own
//! taxonomy in `generator::GeneratorError`; this enum covers everything else.

use thiserror::Error;

/// All error types that can occur in quizpool
#[derive(Debug, Error)]
pub enum QuizpoolError {
    /// Missing or invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Generated content did not pass validation
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Question generator error
    #[error("Generator error: {0}")]
    Generator(String),

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// User not found in storage
    #[error("User not found: {0}")]
    UserNotFound(i64),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<rusqlite::Error> for QuizpoolError {
    fn from(err: rusqlite::Error) -> Self {
        QuizpoolError::Storage(err.to_string())
    }
}

/// Result type alias for quizpool operations
pub type Result<T> = std::result::Result<T, QuizpoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error() {
        let err = QuizpoolError::Config("max_per_user exceeds max_global".to_string());
        assert_eq!(err.to_string(), "Config error: max_per_user exceeds max_global");
    }

    #[test]
    fn test_invalid_state_error() {
        let err = QuizpoolError::InvalidState("run already completed".to_string());
        assert_eq!(err.to_string(), "Invalid state: run already completed");
    }

    #[test]
    fn test_user_not_found_error() {
        let err = QuizpoolError::UserNotFound(42);
        assert_eq!(err.to_string(), "User not found: 42");
    }

    #[test]
    fn test_rusqlite_error_conversion() {
        let err: QuizpoolError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, QuizpoolError::Storage(_)));
        assert!(err.to_string().starts_with("Storage error:"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: QuizpoolError = io_err.into();
        assert!(matches!(err, QuizpoolError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: QuizpoolError = json_err.into();
        assert!(matches!(err, QuizpoolError::Json(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(QuizpoolError::Storage("locked".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }
}
