//! `koboldcord templates`: List the registered chat templates.

use koboldcord_core::template::REGISTRY;

pub fn run() {
    println!("  {:<10} {:<14} MODEL TURN", "NAME", "FAMILY");
    for template in REGISTRY {
        println!(
            "  {:<10} {:<14} {:?}",
            template.name,
            template.family.label(),
            template.format.model_start
        );
    }
}
