//! Echo Bot Example
//!
//! A gscore host with one plugin and two SVs:
//!
//! ```text
//! plugin "demo" (prefix "/")
//! ├── SV "logging"  priority 10  message trigger, never blocks
//! └── SV "commands" priority 0
//!     ├── /echo <text>   prefix
//!     ├── /ping          fullmatch
//!     ├── /info          fullmatch
//!     ├── /ask           fullmatch, waits for the user's next message
//!     └── /group         fullmatch, group chats only (SV "group")
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package echo-bot -- --port 8765
//! cargo run --package console-client -- --url ws://127.0.0.1:8765/ws/console
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use gscore::prelude::*;
use gscore::runtime::GsCoreBuilder;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "echo-bot", about = "Run a demo gscore host")]
struct Args {
    /// Configuration file; `gscore.toml` in the working directory otherwise.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile, e.g. `dev` loads `gscore.dev.toml` first.
    #[arg(long)]
    profile: Option<String>,

    /// Overrides the configured listen port.
    #[arg(short, long)]
    port: Option<u16>,
}

// ============================================================================
// Handler Functions
// ============================================================================

/// Logs every message; registered without blocking so commands still run.
async fn logging_handler(_bot: Bot, event: Event) -> HandlerResult {
    match &event.group_id {
        Some(group) => info!("[Group {}] {}: {}", group, event.user_id, event.raw_text),
        None => info!("[Direct] {}: {}", event.user_id, event.raw_text),
    }
    Ok(())
}

async fn echo_handler(bot: Bot, event: Event) -> HandlerResult {
    if event.text.is_empty() {
        bot.send("Usage: /echo <text>").await?;
    } else {
        bot.send(event.text).await?;
    }
    Ok(())
}

async fn ping_handler(bot: Bot, _event: Event) -> HandlerResult {
    bot.send("Pong!").await?;
    Ok(())
}

async fn info_handler(bot: Bot, event: Event) -> HandlerResult {
    let text = format!(
        "Message Info\n\
        • Bot: {} via {}\n\
        • Type: {}\n\
        • From: {} (pm {})\n\
        • Session: {}",
        event.bot_id,
        bot.ws_id(),
        event.user_type.as_str(),
        event.user_id,
        event.user_pm,
        bot.session_id(),
    );
    bot.send(text).await?;
    Ok(())
}

/// Asks a question and waits for the same user's answer.
async fn ask_handler(bot: Bot, _event: Event) -> HandlerResult {
    let answer = bot
        .prompt("What is your favourite colour?", Duration::from_secs(30))
        .await?;
    bot.send(format!("{} is a fine colour.", answer.raw_text.trim()))
        .await?;
    Ok(())
}

async fn group_handler(bot: Bot, event: Event) -> HandlerResult {
    let group = event.group_id.as_deref().unwrap_or_default();
    bot.send(format!("This is a group-only command! Group: {group}"))
        .await?;
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn builder(args: &Args) -> GsCoreBuilder {
    let mut builder = GsCore::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &args.profile {
        builder = builder.profile(profile.clone());
    }
    if let Some(port) = args.port {
        builder = builder.configure(move |config| config.server.port = port);
    }
    builder
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let core = builder(&args).build()?;

    let plugin = core
        .registry()
        .plugin("demo", PluginOptions::new().prefix("/"))?;

    let logging = core
        .registry()
        .sv("logging", &plugin, SvOptions::new().priority(10))?;
    logging.on_message().block(false).handler(logging_handler)?;

    let commands = core.registry().sv("commands", &plugin, SvOptions::new())?;
    commands.on_prefix("echo").block(true).handler(echo_handler)?;
    commands
        .on_fullmatch(["ping", "Ping"])
        .block(true)
        .handler(ping_handler)?;
    commands.on_fullmatch("info").block(true).handler(info_handler)?;
    commands.on_fullmatch("ask").block(true).handler(ask_handler)?;

    let group = core
        .registry()
        .sv("group", &plugin, SvOptions::new().area(Scope::Group))?;
    group.on_fullmatch("group").block(true).handler(group_handler)?;

    core.on_bot_connect(|bot_id| async move {
        info!(bot_id = %bot_id, "Adapter connected");
        anyhow::Ok(())
    });

    core.run().await?;
    Ok(())
}
