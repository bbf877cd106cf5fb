//! Configuration validation.
//!
//! Checks that required credentials are present and that timing values
//! are usable before any task is spawned.

use thiserror::Error;

use crate::config::{
    Config, ObservabilityConfig, OpenAiConfig, OutboundConfig, SessionConfig, TelegramConfig,
    TypingConfig,
};

/// Telegram drops a typing indicator after about this long.
const TYPING_DECAY_SECS: u64 = 5;

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let sections: [&dyn Validate; 6] = [
            &self.telegram,
            &self.openai,
            &self.session,
            &self.typing,
            &self.outbound,
            &self.observability,
        ];

        let mut errors: Vec<ValidationError> = sections
            .iter()
            .filter_map(|s| s.validate().err())
            .collect();

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }
}

impl Validate for TelegramConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.bot_token.as_deref().map_or(true, str::is_empty) {
            return Err(ValidationError::MissingField {
                field: "telegram.bot_token".into(),
            });
        }
        if self.poll_timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "telegram.poll_timeout_secs".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

impl Validate for OpenAiConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(ValidationError::MissingField {
                field: "openai.api_key".into(),
            });
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ValidationError::InvalidValue {
                field: "openai.base_url".into(),
                reason: "must start with http:// or https://".into(),
            });
        }
        Ok(())
    }
}

impl Validate for SessionConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.upload_timeout_secs == 0 || self.settle_millis == 0 {
            return Err(ValidationError::InvalidValue {
                field: "session".into(),
                reason: "timeouts must be greater than zero".into(),
            });
        }
        if self.settle() >= self.upload_timeout() {
            return Err(ValidationError::InvalidValue {
                field: "session.settle_millis".into(),
                reason: "must be shorter than upload_timeout_secs".into(),
            });
        }
        Ok(())
    }
}

impl Validate for TypingConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.refresh_secs == 0 || self.refresh_secs >= TYPING_DECAY_SECS {
            return Err(ValidationError::InvalidValue {
                field: "typing.refresh_secs".into(),
                reason: format!("must be between 1 and {}", TYPING_DECAY_SECS - 1),
            });
        }
        Ok(())
    }
}

impl Validate for OutboundConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.send_attempts == 0 {
            return Err(ValidationError::InvalidValue {
                field: "outbound.send_attempts".into(),
                reason: "at least one attempt is required".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
        const FORMATS: &[&str] = &["json", "pretty"];

        if !LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of {LEVELS:?}"),
            });
        }
        if !FORMATS.contains(&self.log_format.as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of {FORMATS:?}"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.telegram.bot_token = Some("123:ABC".into());
        config.openai.api_key = Some("sk-test".into());
        config
    }

    #[test]
    fn test_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_missing_credentials() {
        let config = Config::default();
        match config.validate() {
            Err(ValidationError::Multiple(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected two errors, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_bot_token_only() {
        let mut config = valid_config();
        config.telegram.bot_token = Some(String::new());
        assert!(matches!(
            config.validate(),
            Err(ValidationError::MissingField { ref field }) if field == "telegram.bot_token"
        ));
    }

    #[test]
    fn test_settle_must_be_shorter_than_timeout() {
        let mut config = valid_config();
        config.session.upload_timeout_secs = 1;
        config.session.settle_millis = 1000;
        assert!(config.validate().is_err());

        config.session.settle_millis = 999;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = valid_config();
        config.outbound.send_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_typing_refresh_must_beat_decay() {
        let mut config = valid_config();
        for secs in [0, 5, 10] {
            config.typing.refresh_secs = secs;
            assert!(config.validate().is_err(), "refresh_secs = {secs}");
        }

        config.typing.refresh_secs = 4;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_log_settings() {
        let mut config = valid_config();
        config.observability.log_level = "verbose".into();
        assert!(config.validate().is_err());

        config.observability.log_level = "DEBUG".into();
        config.observability.log_format = "json".into();
        assert!(config.validate().is_ok());
    }
}
