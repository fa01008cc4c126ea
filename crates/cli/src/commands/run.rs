//! `koboldcord run`: Connect to Discord and answer mentions.

use koboldcord_agent::Responder;
use koboldcord_channels::DiscordChannel;
use koboldcord_config::AppConfig;
use koboldcord_core::channel::Channel;
use koboldcord_core::event::EventBus;
use koboldcord_providers::KoboldClient;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_discord_token() {
        eprintln!();
        eprintln!("  ERROR: No Discord bot token configured!");
        eprintln!();
        eprintln!("  Set the DISCORD_TOKEN environment variable, or add it to your config:");
        eprintln!("    [discord]");
        eprintln!("    bot_token = \"...\"");
        eprintln!();
        return Err("No Discord token found. See above for setup instructions.".into());
    }

    let persona = Arc::new(config.load_persona()?);
    let backend = Arc::new(KoboldClient::from_config(&config.backend)?);
    let channel = Arc::new(DiscordChannel::from_config(&config.discord)?);
    let events = Arc::new(EventBus::default());
    super::spawn_event_logger(&events);

    let responder = Arc::new(Responder::new(
        &config,
        persona.clone(),
        channel.clone(),
        backend,
        events,
    )?);

    info!(
        persona = %persona.name,
        template = %config.template,
        api_url = %config.backend.api_url,
        mode = ?config.backend.mode,
        "Starting koboldcord"
    );

    let mut task = tokio::spawn(responder.clone().run());

    tokio::select! {
        result = &mut task => {
            result??;
            warn!("Discord event stream closed");
        }
        _ = tokio::signal::ctrl_c() => {
            let cancelled = responder.cancel_active();
            info!(cancelled, "Shutting down");
            channel.stop().await?;
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!("Sessions did not finish within the shutdown grace period");
            }
        }
    }

    Ok(())
}
