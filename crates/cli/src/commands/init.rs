//! `koboldcord init`: Write a starter config and prompt files.

use koboldcord_config::{AppConfig, LOCAL_CONFIG_FILE};
use std::path::Path;

const DEFAULT_SYSTEM_PROMPT: &str = concat!(
    "You are {persona}, a member of this Discord server. {personaDescription}\n\n",
    "Reply to the latest message in the conversation below as {persona}. ",
    "Keep replies short and conversational. If nothing calls for a reply, ",
    "answer with <no_message> and nothing else.\n\n",
    "{conversationBody}\n",
);

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🐉 koboldcord — First-Time Setup");
    println!("================================\n");

    let config_path = Path::new(LOCAL_CONFIG_FILE);
    if config_path.exists() {
        println!("  Config exists: {}", config_path.display());
    } else {
        std::fs::write(config_path, AppConfig::default_toml())?;
        println!("✅ Created {}", config_path.display());
    }

    let config = AppConfig::default();
    let paths = config.persona_paths();
    for (path, contents) in [
        (&paths.system_prompt_file, DEFAULT_SYSTEM_PROMPT.to_string()),
        (
            &paths.persona_file,
            format!("{} is a cheerful kobold who loves shiny things.\n", config.persona),
        ),
    ] {
        if path.exists() {
            println!("  Prompt file exists: {}", path.display());
            continue;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        println!("✅ Created {}", path.display());
    }

    println!();
    println!("  Next steps:");
    println!("    1. Start KoboldCpp (default {})", config.backend.api_url);
    println!("    2. export DISCORD_TOKEN=...");
    println!("    3. koboldcord doctor && koboldcord run");
    Ok(())
}
