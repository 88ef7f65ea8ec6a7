//! Error types for taskcal.
//!
//! Every failure is a tagged [`Error`] value. Callers decide how to surface it by
//! matching on [`Error::kind`]; the `Display` form keeps the short
//! `VALIDATION_ERROR:` / `AUTHORIZATION_ERROR:` prefixes for boundaries that log or
//! forward plain messages.

use thiserror::Error;

/// Result type alias using taskcal's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used by the boundary layer to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, rejected before any write.
    Validation,
    /// Ownership probe failed.
    Authorization,
    /// Requested resource does not exist.
    NotFound,
    /// Everything else (connectivity, unexpected constraint violations, bugs).
    Internal,
}

/// Core error type for taskcal operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing input, or a limit was exceeded.
    #[error("VALIDATION_ERROR: {message}")]
    Validation {
        /// Offending input field, when one can be named.
        field: Option<String>,
        message: String,
    },

    /// The caller does not own the row it tried to mutate (or the row is absent).
    #[error("AUTHORIZATION_ERROR: {message}")]
    Authorization {
        /// Entity kind the probe ran against ("task", "task_list", ...).
        entity: &'static str,
        message: String,
    },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Validation failure not tied to a single field.
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            field: None,
            message: message.into(),
        }
    }

    /// Validation failure for a named input field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// Ownership probe failure for the given entity kind.
    pub fn unauthorized(entity: &'static str, message: impl Into<String>) -> Self {
        Error::Authorization {
            entity,
            message: message.into(),
        }
    }

    /// Classify this error for the boundary layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Authorization { .. } => ErrorKind::Authorization,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Database(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    pub fn is_authorization(&self) -> bool {
        self.kind() == ErrorKind::Authorization
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display_keeps_prefix() {
        let err = Error::validation("Cannot delete the only task list");
        assert_eq!(
            err.to_string(),
            "VALIDATION_ERROR: Cannot delete the only task list"
        );
    }

    #[test]
    fn test_authorization_display_keeps_prefix() {
        let err = Error::unauthorized("task", "Task not found or access denied");
        assert_eq!(
            err.to_string(),
            "AUTHORIZATION_ERROR: Task not found or access denied"
        );
    }

    #[test]
    fn test_invalid_field_carries_field_name() {
        let err = Error::invalid_field("color", "Color must be a hex value like #FF5722");
        match &err {
            Error::Validation { field, message } => {
                assert_eq!(field.as_deref(), Some("color"));
                assert!(message.contains("hex"));
            }
            _ => panic!("Expected Validation error"),
        }
        assert!(err.is_validation());
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(
            Error::unauthorized("tag", "x").kind(),
            ErrorKind::Authorization
        );
        assert_eq!(Error::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(Error::Internal("x".into()).kind(), ErrorKind::Internal);
        assert_eq!(Error::Config("x".into()).kind(), ErrorKind::Internal);
        assert_eq!(
            Error::Database(sqlx::Error::RowNotFound).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_internal_errors_are_unprefixed() {
        let err = Error::Internal("unexpected state".to_string());
        assert_eq!(err.to_string(), "Internal error: unexpected state");
        assert!(!err.to_string().starts_with("VALIDATION_ERROR"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
