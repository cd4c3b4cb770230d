use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::prelude::*;

mod api;
mod chat;
mod config;
mod render;

use crate::api::ApiClient;
use crate::config::{CopilotConfig, ServerConfig};

#[derive(Parser)]
#[command(name = "copilot")]
#[command(about = "Terminal client for the sales co-pilot")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.copilot)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging (written to <data-dir>/logs/copilot.log)
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat interactively (the default)
    Chat(ChatArgs),

    /// List past conversations
    Conversations(ConversationsArgs),
}

#[derive(Parser)]
struct ChatArgs {
    /// Start a fresh conversation with this question
    #[arg(short, long)]
    query: Option<String>,
}

#[derive(Parser)]
struct ConversationsArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = CopilotConfig::new(cli.data_dir.clone())?;
    init_tracing(&config, cli.debug)?;

    match cli.command {
        None => chat::chat_command(&config, None).await,
        Some(Commands::Chat(args)) => chat::chat_command(&config, args.query).await,
        Some(Commands::Conversations(args)) => conversations_command(&config, args.json).await,
    }
}

/// Warnings go to stderr. With `--debug` everything goes to the log file so
/// the chat stays readable.
fn init_tracing(config: &CopilotConfig, debug: bool) -> Result<()> {
    let default_directive = if debug {
        "copilot=debug,copilot_stream=debug,info"
    } else {
        "warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if debug {
        let log_path = config.log_path();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open log file: {:?}", log_path))?;
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn conversations_command(config: &CopilotConfig, json: bool) -> Result<()> {
    let fc = config.load()?;
    let server = ServerConfig::from_file(&fc.server)?;

    let conversations = ApiClient::new(&server.api_url)
        .conversations()
        .await
        .context("Failed to list conversations")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&conversations)?);
    } else if conversations.is_empty() {
        println!("No conversations.");
    } else {
        println!("{:<38} {:<8} {:<20} {}", "ID", "MSGS", "UPDATED", "TITLE");
        println!("{}", "-".repeat(100));
        for c in &conversations {
            // Drop fractional seconds from the backend's ISO timestamps
            let updated = c.updated_at.split('.').next().unwrap_or_default();
            println!(
                "{:<38} {:<8} {:<20} {}",
                c.id,
                c.message_count,
                updated,
                c.display_title()
            );
        }
        println!("\n{} conversation(s)", conversations.len());
    }

    Ok(())
}
