//! Discord channel adapter.
//!
//! Implements the Channel trait on top of `serenity`: the gateway delivers
//! message-created events, REST serves history, send, edit and typing.
//! Message content is delivered with user mentions resolved to names.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use koboldcord_config::DiscordConfig;
use koboldcord_core::channel::{Channel, ChannelId, InboundMessage, MessageHandle};
use koboldcord_core::error::ChannelError;
use koboldcord_core::message::{ConversationMessage, MessageId};
use serenity::all::{
    ActivityData, Cache, ChannelId as DiscordChannelId, Client, Context, EditMessage,
    EventHandler, GatewayIntents, GetMessages, Http, Message, MessageId as DiscordMessageId,
    OnlineStatus, Ready, ShardManager,
};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// How many levels of embedded `referenced_message` to follow.
const MAX_REFERENCE_DEPTH: usize = 3;

/// Discord epoch (2015-01-01T00:00:00Z) in unix milliseconds.
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

/// Discord channel adapter.
pub struct DiscordChannel {
    token: String,
    watch_status: String,
    http: Arc<Http>,
    cache: OnceLock<Arc<Cache>>,
    shard_manager: tokio::sync::Mutex<Option<Arc<ShardManager>>>,
}

impl std::fmt::Debug for DiscordChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordChannel")
            .field("token", &"[REDACTED]")
            .field("watch_status", &self.watch_status)
            .finish()
    }
}

impl DiscordChannel {
    pub fn new(token: impl Into<String>, watch_status: impl Into<String>) -> Result<Self, ChannelError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(ChannelError::NotConfigured(
                "Discord bot token is missing (set DISCORD_TOKEN)".into(),
            ));
        }
        Ok(Self {
            http: Arc::new(Http::new(&token)),
            token,
            watch_status: watch_status.into(),
            cache: OnceLock::new(),
            shard_manager: tokio::sync::Mutex::new(None),
        })
    }

    /// Create the channel from the `[discord]` config section.
    pub fn from_config(config: &DiscordConfig) -> Result<Self, ChannelError> {
        Self::new(
            config.bot_token.clone().unwrap_or_default(),
            config.watch_status.clone(),
        )
    }

    fn convert(&self, msg: &Message) -> ConversationMessage {
        convert_message(self.cache.get(), msg, 0)
    }
}

/// Forwards gateway events into the channel's receiver.
struct Handler {
    tx: mpsc::Sender<Result<InboundMessage, ChannelError>>,
    watch_status: String,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, guilds = ready.guilds.len(), "Discord connected");
        ctx.set_presence(
            Some(ActivityData::watching(self.watch_status.clone())),
            OnlineStatus::Online,
        );
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let bot_id = ctx.cache.current_user().id;
        let inbound = InboundMessage {
            channel_id: ChannelId(msg.channel_id.get().to_string()),
            message: convert_message(Some(&ctx.cache), &msg, 0),
            from_self: msg.author.id == bot_id,
            mentions_self: msg.mentions_user_id(bot_id),
            mentions_everyone: msg.mention_everyone,
        };
        if self.tx.send(Ok(inbound)).await.is_err() {
            debug!("Inbound receiver dropped, discarding Discord message");
        }
    }
}

/// Convert a serenity message, following embedded replies.
fn convert_message(cache: Option<&Arc<Cache>>, msg: &Message, depth: usize) -> ConversationMessage {
    let content = match cache {
        Some(cache) => msg.content_safe(cache),
        None => msg.content.clone(),
    };
    let mut out = build_message(
        msg.id.get(),
        &msg.author.name,
        snowflake_millis(msg.id.get()),
        content,
    );

    match msg.referenced_message.as_deref() {
        Some(parent) if depth < MAX_REFERENCE_DEPTH => {
            out = out.replying_to(convert_message(cache, parent, depth + 1));
        }
        _ => {
            out.reply_to = msg
                .message_reference
                .as_ref()
                .and_then(|r| r.message_id)
                .map(|id| MessageId(id.get().to_string()));
        }
    }
    out
}

fn build_message(id: u64, author: &str, unix_millis: i64, content: String) -> ConversationMessage {
    let timestamp: DateTime<Utc> =
        DateTime::from_timestamp_millis(unix_millis).unwrap_or_else(Utc::now);
    ConversationMessage::new(id.to_string(), author, timestamp, content)
}

/// Creation time of a snowflake id, in unix milliseconds.
///
/// Message timestamps only carry whole seconds; the id keeps the
/// millisecond so messages from the same second stay ordered.
fn snowflake_millis(id: u64) -> i64 {
    (id >> 22) as i64 + DISCORD_EPOCH_MS
}

/// Parse a Discord snowflake. Zero is not a valid id.
fn parse_snowflake(raw: &str) -> Option<u64> {
    raw.parse::<u64>().ok().filter(|id| *id != 0)
}

fn discord_channel(channel_id: &ChannelId) -> Result<DiscordChannelId, ChannelError> {
    parse_snowflake(&channel_id.0)
        .map(DiscordChannelId::new)
        .ok_or_else(|| ChannelError::InvalidPayload(format!("bad channel id '{channel_id}'")))
}

fn discord_message(message_id: &MessageId) -> Result<DiscordMessageId, ChannelError> {
    parse_snowflake(&message_id.0)
        .map(DiscordMessageId::new)
        .ok_or_else(|| ChannelError::InvalidPayload(format!("bad message id '{message_id}'")))
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<InboundMessage, ChannelError>>, ChannelError> {
        if self.cache.get().is_some() {
            return Err(ChannelError::ConnectionLost("Discord channel already started".into()));
        }
        let intents = GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;
        let (tx, rx) = mpsc::channel(64);
        let handler = Handler {
            tx: tx.clone(),
            watch_status: self.watch_status.clone(),
        };

        let mut client = Client::builder(&self.token, intents)
            .event_handler(handler)
            .await
            .map_err(|e| ChannelError::ConnectionLost(e.to_string()))?;

        self.cache
            .set(client.cache.clone())
            .map_err(|_| ChannelError::ConnectionLost("Discord channel already started".into()))?;
        *self.shard_manager.lock().await = Some(client.shard_manager.clone());

        info!("Discord channel starting");
        tokio::spawn(async move {
            if let Err(e) = client.start().await {
                error!(error = %e, "Discord gateway stopped");
                let _ = tx.send(Err(ChannelError::ConnectionLost(e.to_string()))).await;
            }
        });

        Ok(rx)
    }

    async fn fetch_recent(
        &self,
        channel_id: &ChannelId,
        before: &MessageId,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, ChannelError> {
        let channel = discord_channel(channel_id)?;
        let before = discord_message(before)?;
        // Discord caps a page at 100 messages.
        let limit = limit.clamp(1, 100) as u8;

        let page = channel
            .messages(&self.http, GetMessages::new().before(before).limit(limit))
            .await
            .map_err(|e| ChannelError::HistoryFetch {
                channel: channel_id.to_string(),
                reason: e.to_string(),
            })?;

        debug!(channel = %channel_id, count = page.len(), "Fetched Discord history");
        Ok(page.iter().map(|m| self.convert(m).detached()).collect())
    }

    async fn send(&self, channel_id: &ChannelId, content: &str) -> Result<MessageHandle, ChannelError> {
        let channel = discord_channel(channel_id)?;
        let sent = channel
            .say(&self.http, content)
            .await
            .map_err(|e| ChannelError::DeliveryFailed {
                channel: channel_id.to_string(),
                reason: e.to_string(),
            })?;

        Ok(MessageHandle {
            channel_id: channel_id.clone(),
            message_id: MessageId(sent.id.get().to_string()),
        })
    }

    async fn edit(&self, handle: &MessageHandle, content: &str) -> Result<(), ChannelError> {
        let channel = discord_channel(&handle.channel_id)?;
        let message = discord_message(&handle.message_id)?;
        channel
            .edit_message(&self.http, message, EditMessage::new().content(content))
            .await
            .map_err(|e| ChannelError::DeliveryFailed {
                channel: handle.channel_id.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn send_typing(&self, channel_id: &ChannelId) -> Result<(), ChannelError> {
        let channel = discord_channel(channel_id)?;
        channel
            .broadcast_typing(&self.http)
            .await
            .map_err(|e| ChannelError::DeliveryFailed {
                channel: channel_id.to_string(),
                reason: e.to_string(),
            })
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        info!("Discord channel stopping");
        if let Some(manager) = self.shard_manager.lock().await.take() {
            manager.shutdown_all().await;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, ChannelError> {
        Ok(self.http.get_current_user().await.is_ok())
    }
}
