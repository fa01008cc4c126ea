//! `koboldcord doctor`: Diagnose configuration and backend health.

use koboldcord_config::AppConfig;
use koboldcord_core::backend::GenerationBackend;
use koboldcord_providers::KoboldClient;
use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 koboldcord Doctor — System Diagnostics");
    println!("========================================\n");

    let mut issues = 0;

    let config = match AppConfig::load(config_path) {
        Ok(config) => {
            println!("  ✅ Config valid (template '{}')", config.template);
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  Fix the config before running further checks.");
            return Ok(());
        }
    };

    // Persona files
    match config.load_persona() {
        Ok(persona) => println!("  ✅ Persona '{}' loaded", persona.name),
        Err(e) => {
            println!("  ❌ Persona: {e}");
            issues += 1;
        }
    }

    // Discord token
    if config.has_discord_token() {
        println!("  ✅ Discord token configured");
    } else {
        println!("  ⚠️  No Discord token — set DISCORD_TOKEN (only `chat` will work)");
        issues += 1;
    }

    // Backend reachability
    match KoboldClient::from_config(&config.backend) {
        Ok(client) => match client.health_check().await {
            Ok(true) => println!("  ✅ Backend reachable at {}", client.base_url()),
            Ok(false) => {
                println!("  ❌ Backend at {} answered but reported no model", client.base_url());
                issues += 1;
            }
            Err(e) => {
                println!("  ❌ Backend unreachable: {e}");
                issues += 1;
            }
        },
        Err(e) => {
            println!("  ❌ Backend: {e}");
            issues += 1;
        }
    }

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
