//! History collection.
//!
//! Builds the window of messages a reply is conditioned on: the trigger, a
//! bounded walk up its reply chain, and the most recent channel messages
//! before it.

use koboldcord_core::channel::{Channel, ChannelId};
use koboldcord_core::message::{ConversationMessage, ConversationWindow};
use tracing::{debug, warn};

/// Maximum number of reply-chain ancestors followed from the trigger.
pub const MAX_REPLY_HOPS: usize = 3;

/// Default number of channel messages fetched before the trigger.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Collects the conversation window for one trigger.
#[derive(Debug, Clone)]
pub struct HistoryCollector {
    limit: usize,
}

impl HistoryCollector {
    /// `limit` is clamped to the platform page size range (1..=100).
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.clamp(1, 100),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Collect the window for `trigger`.
    ///
    /// A failed history fetch is logged and the window falls back to the
    /// trigger and its reply chain.
    pub async fn collect(
        &self,
        channel: &dyn Channel,
        channel_id: &ChannelId,
        trigger: &ConversationMessage,
    ) -> ConversationWindow {
        let mut collected = reply_chain(trigger);
        let chain_len = collected.len();

        match channel.fetch_recent(channel_id, &trigger.id, self.limit).await {
            Ok(page) => collected.extend(page),
            Err(e) => warn!(channel = %channel_id, error = %e, "History fetch failed, using reply chain only"),
        }

        let window = ConversationWindow::from_collected(collected);
        debug!(
            channel = %channel_id,
            chain = chain_len - 1,
            messages = window.len(),
            authors = window.authors().len(),
            "Collected history"
        );
        window
    }
}

impl Default for HistoryCollector {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

/// The trigger followed by up to [`MAX_REPLY_HOPS`] ancestors, newest first.
fn reply_chain(trigger: &ConversationMessage) -> Vec<ConversationMessage> {
    let mut chain = vec![trigger.detached()];
    let mut parent = trigger.referenced.as_deref();
    while let Some(message) = parent {
        if chain.len() > MAX_REPLY_HOPS {
            break;
        }
        chain.push(message.detached());
        parent = message.referenced.as_deref();
    }
    chain
}
