//! koboldcord CLI: the main entry point.
//!
//! Commands:
//! - `init`: Write a starter config and prompt files
//! - `run`: Connect to Discord and answer mentions
//! - `chat`: Talk to the persona from the terminal
//! - `templates`: List the registered chat templates
//! - `doctor`: Check config, persona files and backend reachability

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "koboldcord",
    about = "koboldcord — KoboldCpp-backed Discord persona bot",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./koboldcord.toml, then ~/.koboldcord/config.toml)
    #[arg(short, long, global = true, env = "KOBOLDCORD_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config and prompt files
    Init,

    /// Run the Discord bot until Ctrl+C
    Run,

    /// Chat with the persona in the terminal
    Chat {
        /// Name you appear under in the conversation
        #[arg(short, long, default_value = "you")]
        user: String,
    },

    /// List the registered chat templates
    Templates,

    /// Diagnose configuration and backend health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Secrets such as DISCORD_TOKEN may live in ./.env; real env vars win
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Init => commands::init::run()?,
        Commands::Run => commands::run::run(config).await?,
        Commands::Chat { user } => commands::chat::run(config, user).await?,
        Commands::Templates => commands::templates::run(),
        Commands::Doctor => commands::doctor::run(config).await?,
    }

    Ok(())
}
