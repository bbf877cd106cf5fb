//! Configuration management for the Imagen bot.
//!
//! The bot reads an optional configuration file at `~/.imagen-bot/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Command line flags (applied by the binary)
//! 2. Environment variables
//! 3. Explicit config file values
//! 4. Default values
//!
//! # Environment Variable Mapping
//!
//! - `OPENAI_API_KEY` → openai.api_key
//! - `BOT_TOKEN` → telegram.bot_token
//! - `ALLOWED_USERIDS` → telegram.allowed_user_ids (comma separated)
//! - `ADMIN_USERIDS` → telegram.admin_user_ids (comma separated)
//! - `ALLOWED_GROUPIDS` → telegram.allowed_group_ids (comma separated)
//! - `IMAGEN_LOG_LEVEL` → observability.log_level

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".imagen-bot"),
        |dirs| dirs.home_dir().join(".imagen-bot"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Telegram
// ============================================================================

/// Telegram bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token issued by BotFather
    #[serde(default)]
    pub bot_token: Option<String>,

    /// Bot API base URL (overridable for local Bot API servers)
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,

    /// Users allowed to talk to the bot in private chats
    #[serde(default)]
    pub allowed_user_ids: Vec<i64>,

    /// Users receiving operational notices; implicitly allowed
    #[serde(default)]
    pub admin_user_ids: Vec<i64>,

    /// Group chats the bot answers in
    #[serde(default)]
    pub allowed_group_ids: Vec<i64>,

    /// Long-poll timeout for getUpdates
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_base: default_telegram_api_base(),
            allowed_user_ids: Vec::new(),
            admin_user_ids: Vec::new(),
            allowed_group_ids: Vec::new(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

impl TelegramConfig {
    /// Check whether a user may use the bot from a private chat. Admins
    /// always may.
    pub fn is_user_allowed(&self, user_id: i64) -> bool {
        self.allowed_user_ids.contains(&user_id) || self.admin_user_ids.contains(&user_id)
    }

    /// Check whether the bot answers in a group chat.
    pub fn is_group_allowed(&self, chat_id: i64) -> bool {
        self.allowed_group_ids.contains(&chat_id)
    }
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".into()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

// ============================================================================
// OpenAI
// ============================================================================

/// OpenAI Images API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    /// API base URL including the version segment
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_image_model")]
    pub model: String,

    /// Upper bound for a single generation/edit round trip
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_openai_base_url(),
            model: default_image_model(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_image_model() -> String {
    "gpt-image-1".into()
}

fn default_request_timeout_secs() -> u64 {
    300
}

// ============================================================================
// Session timing
// ============================================================================

/// Upload collection timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a session waits for the first upload
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,

    /// Quiet period after an upload before the batch is considered complete
    #[serde(default = "default_settle_millis")]
    pub settle_millis: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            upload_timeout_secs: default_upload_timeout_secs(),
            settle_millis: default_settle_millis(),
        }
    }
}

impl SessionConfig {
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_millis)
    }
}

fn default_upload_timeout_secs() -> u64 {
    180
}

fn default_settle_millis() -> u64 {
    1000
}

/// Typing presence refresh configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingConfig {
    /// Telegram drops the indicator after ~5s, so this must stay below that.
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            refresh_secs: default_refresh_secs(),
        }
    }
}

impl TypingConfig {
    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }
}

fn default_refresh_secs() -> u64 {
    4
}

/// Outbound send policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Total attempts per send (first try included)
    #[serde(default = "default_send_attempts")]
    pub send_attempts: u32,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            send_attempts: default_send_attempts(),
        }
    }
}

fn default_send_attempts() -> u32 {
    2
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub typing: TypingConfig,

    #[serde(default)]
    pub outbound: OutboundConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    ///
    /// An explicit path must exist; the default path is optional.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|v| !v.is_empty()) {
            self.openai.api_key = Some(key);
        }
        if let Some(token) = lookup("BOT_TOKEN").filter(|v| !v.is_empty()) {
            self.telegram.bot_token = Some(token);
        }
        if let Some(raw) = lookup("ALLOWED_USERIDS").filter(|v| !v.is_empty()) {
            self.telegram.allowed_user_ids =
                parse_id_list(&raw).context("allowed user ids contains an invalid user ID")?;
        }
        if let Some(raw) = lookup("ADMIN_USERIDS").filter(|v| !v.is_empty()) {
            self.telegram.admin_user_ids =
                parse_id_list(&raw).context("admin ids contains an invalid user ID")?;
        }
        if let Some(raw) = lookup("ALLOWED_GROUPIDS").filter(|v| !v.is_empty()) {
            self.telegram.allowed_group_ids =
                parse_id_list(&raw).context("allowed group ids contains an invalid group ID")?;
        }
        if let Some(level) = lookup("IMAGEN_LOG_LEVEL").filter(|v| !v.is_empty()) {
            self.observability.log_level = level;
        }
        Ok(())
    }

    /// Get the bot token, if configured.
    pub fn bot_token(&self) -> Option<&str> {
        self.telegram.bot_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Get the OpenAI API key, if configured.
    pub fn openai_api_key(&self) -> Option<&str> {
        self.openai.api_key.as_deref().filter(|k| !k.is_empty())
    }
}

/// Parse a comma separated list of Telegram ids. Empty entries are skipped.
pub fn parse_id_list(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .with_context(|| format!("invalid id: {s}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.session.upload_timeout(), Duration::from_secs(180));
        assert_eq!(config.session.settle(), Duration::from_millis(1000));
        assert_eq!(config.typing.refresh_period(), Duration::from_secs(4));
        assert_eq!(config.outbound.send_attempts, 2);
        assert_eq!(config.openai.model, "gpt-image-1");
        assert_eq!(config.telegram.api_base, "https://api.telegram.org");
        assert!(config.bot_token().is_none());
    }

    #[test]
    fn test_parse_id_list() {
        assert_eq!(parse_id_list("1,2, 3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_id_list("-100123,,").unwrap(), vec![-100123]);
        assert!(parse_id_list("").unwrap().is_empty());
        assert!(parse_id_list("12,abc").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides_from(env(&[
                ("OPENAI_API_KEY", "sk-test"),
                ("BOT_TOKEN", "123:ABC"),
                ("ALLOWED_USERIDS", "10,20"),
                ("ADMIN_USERIDS", "30"),
                ("ALLOWED_GROUPIDS", "-500"),
                ("IMAGEN_LOG_LEVEL", "debug"),
            ]))
            .unwrap();

        assert_eq!(config.openai_api_key(), Some("sk-test"));
        assert_eq!(config.bot_token(), Some("123:ABC"));
        assert_eq!(config.telegram.allowed_user_ids, vec![10, 20]);
        assert_eq!(config.telegram.admin_user_ids, vec![30]);
        assert!(config.telegram.is_user_allowed(30));
        assert_eq!(config.telegram.allowed_group_ids, vec![-500]);
        assert_eq!(config.observability.log_level, "debug");
    }

    #[test]
    fn test_env_invalid_ids_rejected() {
        let mut config = Config::default();
        let result = config.apply_overrides_from(env(&[("ALLOWED_USERIDS", "1,x")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_admins_are_allowed() {
        let mut config = Config::default();
        config.telegram.admin_user_ids = vec![7];
        assert!(config.telegram.is_user_allowed(7));
        assert!(!config.telegram.is_user_allowed(8));
        assert!(!config.telegram.is_group_allowed(-1));
    }

    #[test]
    fn test_replaced_admins_lose_access() {
        let mut config = Config::default();
        config
            .apply_overrides_from(env(&[("ALLOWED_USERIDS", "10"), ("ADMIN_USERIDS", "30")]))
            .unwrap();

        // A later layer, such as a command line flag, replaces the admin list
        config.telegram.admin_user_ids = vec![40];

        assert!(config.telegram.is_user_allowed(10));
        assert!(config.telegram.is_user_allowed(40));
        assert!(!config.telegram.is_user_allowed(30));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "telegram": {{ "bot_token": "t", "allowed_group_ids": [-42] }},
                "session": {{ "settle_millis": 250 }},
                "observability": {{ "level": "warn" }}
            }}"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.bot_token(), Some("t"));
        assert!(config.telegram.is_group_allowed(-42));
        assert_eq!(config.session.settle(), Duration::from_millis(250));
        assert_eq!(config.session.upload_timeout_secs, 180);
        assert_eq!(config.observability.log_level, "warn");
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load_from(&dir.path().join("nope.json"));
        assert!(result.is_err());
    }
}
