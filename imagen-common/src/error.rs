//! Error types shared by the Imagen crates.

use thiserror::Error;

use crate::validation::ValidationError;

/// Result type alias using the common error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Startup and wiring errors.
///
/// Per-request failures have their own types in the bot crate; this enum
/// covers what can stop the process from starting.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration failed validation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// External service error
    #[error("External service error: {0}")]
    External(String),

    /// Other error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_with_context() {
        let err = Error::Config("bot token not set".into());
        let with_ctx = err.with_context("starting bot");
        assert!(matches!(with_ctx, Error::WithContext { .. }));
        assert_eq!(
            with_ctx.to_string(),
            "starting bot: Configuration error: bot token not set"
        );
    }

    #[test]
    fn test_validation_converts() {
        let err: Error = ValidationError::MissingField {
            field: "openai.api_key".into(),
        }
        .into();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(err.to_string(), "Missing required field: openai.api_key");
    }

    #[test]
    fn test_external_error_context() {
        let err = Error::External("401 Unauthorized".into()).with_context("can't init telegram bot");
        assert_eq!(
            err.to_string(),
            "can't init telegram bot: External service error: 401 Unauthorized"
        );
    }
}
