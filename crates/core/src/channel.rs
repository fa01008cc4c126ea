//! Channel trait: the abstraction over chat platforms.
//!
//! A Channel connects koboldcord to a messaging platform (Discord, the local
//! terminal, ...). It delivers message-created events, serves paged history,
//! and exposes the send/edit/typing operations a generation session needs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;
use crate::message::{ConversationMessage, MessageId};

/// Identifier of a conversation channel on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Points at a message the bot has sent, so it can be edited later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHandle {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

/// A message-created event delivered by a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Where the message was posted
    pub channel_id: ChannelId,

    /// The message itself, including its reply chain
    pub message: ConversationMessage,

    /// Authored by the bot account
    #[serde(default)]
    pub from_self: bool,

    /// Explicitly mentions the bot account
    #[serde(default)]
    pub mentions_self: bool,

    /// Broadcast mention (`@everyone` / `@here`)
    #[serde(default)]
    pub mentions_everyone: bool,
}

/// The core Channel trait.
///
/// Implementations handle platform-specific connection logic, mention
/// resolution and message formatting.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name (e.g., "discord", "cli").
    fn name(&self) -> &str;

    /// Start listening for incoming messages.
    ///
    /// Returns a receiver that yields message-created events. The channel
    /// implementation handles gateways or stdin reading internally.
    async fn start(
        &self,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<InboundMessage, ChannelError>>,
        ChannelError,
    >;

    /// Fetch up to `limit` messages posted before `before`, newest first.
    async fn fetch_recent(
        &self,
        channel_id: &ChannelId,
        before: &MessageId,
        limit: usize,
    ) -> std::result::Result<Vec<ConversationMessage>, ChannelError>;

    /// Post a new message and return a handle for later edits.
    async fn send(
        &self,
        channel_id: &ChannelId,
        content: &str,
    ) -> std::result::Result<MessageHandle, ChannelError>;

    /// Replace the content of a message previously sent by the bot.
    async fn edit(
        &self,
        handle: &MessageHandle,
        content: &str,
    ) -> std::result::Result<(), ChannelError>;

    /// Show a typing indicator (if the platform supports it).
    async fn send_typing(&self, _channel_id: &ChannelId) -> std::result::Result<(), ChannelError> {
        Ok(()) // No-op default
    }

    /// Stop the channel gracefully.
    async fn stop(&self) -> std::result::Result<(), ChannelError> {
        Ok(())
    }

    /// Health check: is the channel connected and operational?
    async fn health_check(&self) -> std::result::Result<bool, ChannelError> {
        Ok(true)
    }
}
