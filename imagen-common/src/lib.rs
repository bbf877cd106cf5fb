//! Imagen Common - Shared types and utilities for the Imagen Telegram bot.
//!
//! This crate provides:
//! - Configuration types and loading (file, environment, command line)
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup with noise filtering
//! - Small string helpers used when building replies

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    Config, ObservabilityConfig, OpenAiConfig, OutboundConfig, SessionConfig, TelegramConfig,
    TypingConfig,
};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};
