//! Imagen Bot - Main entry point.

use anyhow::{Context, Result};
use clap::Parser;
use imagen_bot::run_bot;
use imagen_common::config::{parse_id_list, Config};
use imagen_common::logging::init_logging;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "imagen-bot")]
#[command(version)]
#[command(about = "Telegram bot for OpenAI image generation and editing.", long_about = None)]
struct Cli {
    /// Config file (default: ~/.imagen-bot/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// OpenAI API key
    #[arg(long)]
    openai_api_key: Option<String>,

    /// Telegram bot token
    #[arg(long)]
    bot_token: Option<String>,

    /// Comma separated user ids allowed in private chats
    #[arg(long)]
    allowed_user_ids: Option<String>,

    /// Comma separated admin user ids
    #[arg(long)]
    admin_user_ids: Option<String>,

    /// Comma separated group chat ids the bot answers in
    #[arg(long)]
    allowed_group_ids: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty or json)
    #[arg(long)]
    log_format: Option<String>,
}

impl Cli {
    /// Apply flags on top of file and environment settings.
    fn apply(self, config: &mut Config) -> Result<()> {
        if let Some(key) = self.openai_api_key {
            config.openai.api_key = Some(key);
        }
        if let Some(token) = self.bot_token {
            config.telegram.bot_token = Some(token);
        }
        if let Some(raw) = self.allowed_user_ids {
            config.telegram.allowed_user_ids =
                parse_id_list(&raw).context("allowed user ids contains an invalid user ID")?;
        }
        if let Some(raw) = self.admin_user_ids {
            config.telegram.admin_user_ids =
                parse_id_list(&raw).context("admin ids contains an invalid user ID")?;
        }
        if let Some(raw) = self.allowed_group_ids {
            config.telegram.allowed_group_ids =
                parse_id_list(&raw).context("allowed group ids contains an invalid group ID")?;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.observability.log_format = format;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load_with_env(cli.config.as_deref())?;
    cli.apply(&mut config)?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("Imagen Bot v{}", env!("CARGO_PKG_VERSION"));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Can't listen for interrupt signal");
            return;
        }
        tracing::info!("Interrupt received, shutting down");
        signal.cancel();
    });

    run_bot(&config, shutdown).await?;
    Ok(())
}
