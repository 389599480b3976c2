//! zpl-render
//!
//! Operator CLI over the render engine.
//!
//! # Commands
//!
//! - `document`: render every label of a ZPL file into one PDF
//! - `preview`: render one label as PNG
//! - `analyze`: print label marker statistics as JSON
//! - `health`: probe every configured upstream endpoint

mod commands;
mod logger;

use clap::Parser;
use commands::Cli;
use zpl_render::{RenderConfig, RenderError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 设置环境 (.env)
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // 2. 日志
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let json = std::env::var("LOG_JSON")
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes"))
        .unwrap_or(false);
    let log_dir = std::env::var("LOG_DIR").ok().filter(|d| !d.trim().is_empty());
    logger::init_logger_with_file(&level, json, log_dir.as_deref())?;

    // 3. 加载配置
    let config = RenderConfig::from_env();
    tracing::debug!(?config, "Configuration loaded");

    // 4. 执行命令
    if let Err(e) = commands::run(cli.command, config).await {
        let retryable = e
            .downcast_ref::<RenderError>()
            .is_some_and(RenderError::is_retryable);
        tracing::error!(error = %e, retryable, "Command failed");
        if retryable {
            tracing::warn!("Upstream busy or unreachable, try again later");
        }
        return Err(e);
    }

    Ok(())
}
