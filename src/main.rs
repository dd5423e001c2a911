//! Gateway CLI — send and broadcast messages from the command line.

use agent_gateway::channel::ChannelRegistry;
use agent_gateway::directory::RecipientDirectory;
use agent_gateway::router::MessageRouter;
use agent_gateway::{GatewayConfig, Message, Priority};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "agent-gateway", about = "Route messages to roster agents")]
struct Cli {
    /// Log actuation instead of performing it.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one message to one recipient.
    Send {
        /// Recipient name from the roster.
        #[arg(long)]
        recipient: String,
        /// Message body.
        #[arg(long)]
        message: String,
        /// Priority: low, normal, high, urgent.
        #[arg(long, default_value = "normal")]
        priority: Priority,
        /// Classification tags (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Send the same content to many recipients.
    Broadcast {
        /// Message body.
        #[arg(long)]
        message: String,
        /// Priority: low, normal, high, urgent.
        #[arg(long, default_value = "normal")]
        priority: Priority,
        /// Recipient names; defaults to the whole roster.
        recipients: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = GatewayConfig::from_env();
    if cli.dry_run {
        config.dry_run = true;
    }

    let directory = Arc::new(
        RecipientDirectory::load(&config.roster_path, &config.default_fallback)
            .with_context(|| format!("loading roster from {}", config.roster_path.display()))?,
    );
    let registry = Arc::new(ChannelRegistry::standard(&config));
    let router = MessageRouter::new(directory, registry, &config);
    info!(
        roster = %config.roster_path.display(),
        recipients = router.directory().len(),
        dry_run = config.dry_run,
        "Gateway ready"
    );

    let all_sent = match cli.command {
        Command::Send {
            recipient,
            message,
            priority,
            tags,
        } => {
            let tags: BTreeSet<String> = tags.into_iter().collect();
            let msg = Message::with_tags("cli", &recipient, &message, priority, tags);
            let result = router.send(msg).await?;
            println!("{}", result.status_line());
            result.is_sent()
        }
        Command::Broadcast {
            message,
            priority,
            recipients,
        } => {
            let recipients = if recipients.is_empty() {
                router.directory().recipients()
            } else {
                recipients
            };
            let template = Message::new(
                "cli",
                recipients.first().map(String::as_str).unwrap_or_default(),
                &message,
                priority,
            );
            let results = router.broadcast(&template, &recipients).await?;
            for result in &results {
                println!("{}", result.status_line());
            }
            results.iter().all(|r| r.is_sent())
        }
    };

    if !all_sent {
        std::process::exit(1);
    }
    Ok(())
}
