//! CLI channel: interactive terminal-based chat.
//!
//! Reads lines from stdin and writes replies to stdout. Every line is
//! delivered as a message that mentions the bot, and the session transcript
//! is kept in memory so history collection works the same as on Discord.
//! Used for `koboldcord chat`.

use async_trait::async_trait;
use chrono::Utc;
use koboldcord_core::channel::{Channel, ChannelId, InboundMessage, MessageHandle};
use koboldcord_core::error::ChannelError;
use koboldcord_core::message::{ConversationMessage, MessageId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

type LineSource = Box<dyn AsyncBufRead + Unpin + Send>;

/// Interactive CLI channel for terminal-based chat.
pub struct CliChannel {
    id: ChannelId,
    user_name: String,
    bot_name: String,
    next_id: Arc<AtomicU64>,
    transcript: Arc<Mutex<Vec<ConversationMessage>>>,
    input: tokio::sync::Mutex<Option<LineSource>>,
}

impl CliChannel {
    /// Chat on stdin/stdout as `user_name`, with replies shown as `bot_name`.
    pub fn new(user_name: impl Into<String>, bot_name: impl Into<String>) -> Self {
        Self::with_input(user_name, bot_name, BufReader::new(io::stdin()))
    }

    /// Read lines from `input` instead of stdin.
    pub fn with_input(
        user_name: impl Into<String>,
        bot_name: impl Into<String>,
        input: impl AsyncBufRead + Unpin + Send + 'static,
    ) -> Self {
        Self {
            id: ChannelId("cli".into()),
            user_name: user_name.into(),
            bot_name: bot_name.into(),
            next_id: Arc::new(AtomicU64::new(1)),
            transcript: Arc::new(Mutex::new(Vec::new())),
            input: tokio::sync::Mutex::new(Some(Box::new(input))),
        }
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.id
    }

    /// A snapshot of everything said so far, oldest first.
    pub fn transcript(&self) -> Vec<ConversationMessage> {
        lock(&self.transcript).clone()
    }

    fn record(&self, author: &str, content: &str) -> MessageId {
        let message = next_message(&self.next_id, author, content);
        let id = message.id.clone();
        lock(&self.transcript).push(message);
        id
    }
}

fn lock(
    transcript: &Mutex<Vec<ConversationMessage>>,
) -> std::sync::MutexGuard<'_, Vec<ConversationMessage>> {
    transcript.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn next_message(counter: &AtomicU64, author: &str, content: &str) -> ConversationMessage {
    let id = counter.fetch_add(1, Ordering::Relaxed);
    ConversationMessage::new(id.to_string(), author, Utc::now(), content)
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<InboundMessage, ChannelError>>, ChannelError> {
        let reader = self
            .input
            .lock()
            .await
            .take()
            .ok_or_else(|| ChannelError::ConnectionLost("CLI input already consumed".into()))?;

        let (tx, rx) = mpsc::channel(32);
        let channel_id = self.id.clone();
        let user_name = self.user_name.clone();
        let next_id = self.next_id.clone();
        let transcript = self.transcript.clone();

        tokio::spawn(async move {
            let mut lines = reader.lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }

                        // Check for exit commands
                        if matches!(line.as_str(), "exit" | "quit" | "/exit" | "/quit" | ":q") {
                            break;
                        }

                        let message = next_message(&next_id, &user_name, &line);
                        lock(&transcript).push(message.clone());

                        let inbound = InboundMessage {
                            channel_id: channel_id.clone(),
                            message,
                            from_self: false,
                            mentions_self: true,
                            mentions_everyone: false,
                        };

                        if tx.send(Ok(inbound)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF (Ctrl+D)
                    Err(e) => {
                        let _ = tx.send(Err(ChannelError::ConnectionLost(e.to_string()))).await;
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn fetch_recent(
        &self,
        _channel_id: &ChannelId,
        before: &MessageId,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, ChannelError> {
        let transcript = lock(&self.transcript);
        let end = transcript
            .iter()
            .position(|m| &m.id == before)
            .unwrap_or(transcript.len());
        Ok(transcript[..end].iter().rev().take(limit).cloned().collect())
    }

    async fn send(&self, channel_id: &ChannelId, content: &str) -> Result<MessageHandle, ChannelError> {
        let message_id = self.record(&self.bot_name, content);
        println!("{}: {content}", self.bot_name);
        Ok(MessageHandle {
            channel_id: channel_id.clone(),
            message_id,
        })
    }

    async fn edit(&self, handle: &MessageHandle, content: &str) -> Result<(), ChannelError> {
        let previous = {
            let mut transcript = lock(&self.transcript);
            let entry = transcript
                .iter_mut()
                .find(|m| m.id == handle.message_id)
                .ok_or_else(|| ChannelError::DeliveryFailed {
                    channel: handle.channel_id.to_string(),
                    reason: format!("no message {}", handle.message_id),
                })?;
            std::mem::replace(&mut entry.content, content.to_string())
        };

        // Show only what the revision appended when it extends the old text.
        match content.strip_prefix(previous.as_str()) {
            Some(appended) if !appended.is_empty() => println!("{}… {appended}", self.bot_name),
            _ => println!("{} (edited): {content}", self.bot_name),
        }
        Ok(())
    }
}
