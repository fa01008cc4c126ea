//! `koboldcord chat`: Talk to the persona from the terminal.

use koboldcord_agent::Responder;
use koboldcord_channels::CliChannel;
use koboldcord_config::AppConfig;
use koboldcord_core::event::EventBus;
use koboldcord_providers::KoboldClient;
use std::path::Path;
use std::sync::Arc;

pub async fn run(config_path: Option<&Path>, user: String) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let persona = Arc::new(config.load_persona()?);
    let backend = Arc::new(KoboldClient::from_config(&config.backend)?);
    let channel = Arc::new(CliChannel::new(user, persona.name.clone()));
    let events = Arc::new(EventBus::default());
    super::spawn_event_logger(&events);

    let responder = Arc::new(Responder::new(&config, persona.clone(), channel, backend, events)?);

    println!();
    println!("  koboldcord — terminal chat");
    println!();
    println!("  Persona:   {}", persona.name);
    println!("  Template:  {}", config.template);
    println!("  Backend:   {} ({:?})", config.backend.api_url, config.backend.mode);
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    responder.run().await?;
    Ok(())
}
