//! Chat channel implementations for koboldcord.
//!
//! Each channel connects to a chat platform, delivers message-created events
//! and exposes the history/send/edit operations the responder needs.
//!
//! Available channels:
//! - **Discord**: Discord gateway + REST via serenity
//! - **CLI**: Interactive terminal chat (stdin/stdout)

pub mod cli;
pub mod discord;

pub use cli::CliChannel;
pub use discord::DiscordChannel;
