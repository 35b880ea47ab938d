//! turnledger CLI — the main entry point.
//!
//! Commands:
//! - `chat`    — Interactive chat or single-message mode over a bounded ledger
//! - `config`  — Show the effective or default configuration
//! - `doctor`  — Diagnose configuration and provider reachability

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::chat::ChatArgs;

#[derive(Parser)]
#[command(
    name = "turnledger",
    about = "turnledger — chat with bounded conversational memory",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the configured model
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Number of user/assistant turns to remember
        #[arg(short = 'k', long, env = "TURNLEDGER_MAX_TURNS")]
        max_turns: Option<usize>,

        /// System prompt (empty string disables it)
        #[arg(short, long)]
        system: Option<String>,

        /// Print the reply as it streams in
        #[arg(long)]
        stream: bool,

        /// Load the conversation from this file and save it after every turn
        #[arg(short, long)]
        transcript: Option<PathBuf>,

        /// Keep the conversation in a named transcript under ~/.turnledger/transcripts
        #[arg(long, conflicts_with = "transcript")]
        session: Option<String>,
    },

    /// Show configuration
    Config {
        /// Print the built-in defaults instead of the effective config
        #[arg(long)]
        default: bool,

        /// Print only the config file path
        #[arg(long, conflicts_with = "default")]
        path: bool,
    },

    /// Diagnose configuration and provider reachability
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat {
            message,
            max_turns,
            system,
            stream,
            transcript,
            session,
        } => {
            commands::chat::run(ChatArgs {
                message,
                max_turns,
                system,
                stream,
                transcript,
                session,
            })
            .await?
        }
        Commands::Config { default: true, .. } => commands::config_cmd::defaults().await?,
        Commands::Config { path: true, .. } => commands::config_cmd::path().await?,
        Commands::Config { .. } => commands::config_cmd::show().await?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
