//! Conversation message and window types.
//!
//! These are the value objects that flow through one trigger's processing:
//! Channel delivers a message → Collector builds a window → Renderer turns it
//! into a prompt. Nothing here is ever persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Opaque, comparable identifier for a platform message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single observed chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Platform message ID
    pub id: MessageId,

    /// Author display name
    pub author: String,

    /// When the message was created
    pub timestamp: DateTime<Utc>,

    /// Text content with platform mentions already resolved to names
    pub content: String,

    /// ID of the message this one replies to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,

    /// The replied-to message itself, as far as the platform delivered it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced: Option<Box<ConversationMessage>>,
}

impl ConversationMessage {
    /// Create a message with no reply reference.
    pub fn new(
        id: impl Into<String>,
        author: impl Into<String>,
        timestamp: DateTime<Utc>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId(id.into()),
            author: author.into(),
            timestamp,
            content: content.into(),
            reply_to: None,
            referenced: None,
        }
    }

    /// Attach the message this one replies to.
    pub fn replying_to(mut self, parent: ConversationMessage) -> Self {
        self.reply_to = Some(parent.id.clone());
        self.referenced = Some(Box::new(parent));
        self
    }

    /// A copy without the embedded reply chain.
    ///
    /// `reply_to` is kept so the link stays visible; only the nested
    /// message bodies are dropped.
    pub fn detached(&self) -> Self {
        Self {
            referenced: None,
            ..self.clone()
        }
    }
}

/// An ordered, deduplicated slice of conversation history.
///
/// Invariants: entries are chronological (oldest first) and no two entries
/// share an id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationWindow {
    messages: Vec<ConversationMessage>,

    /// Distinct author names in the order they were first encountered while
    /// collecting (not chronological).
    authors: Vec<String>,
}

impl ConversationWindow {
    /// Build a window from messages in collection order.
    ///
    /// Duplicate ids are dropped (first occurrence wins), the remainder is
    /// reversed and then stably sorted by timestamp.
    pub fn from_collected(collected: Vec<ConversationMessage>) -> Self {
        let mut seen: HashSet<MessageId> = HashSet::with_capacity(collected.len());
        let mut authors: Vec<String> = Vec::new();
        let mut messages: Vec<ConversationMessage> = Vec::with_capacity(collected.len());

        for message in collected {
            if !seen.insert(message.id.clone()) {
                continue;
            }
            if !authors.iter().any(|a| a == &message.author) {
                authors.push(message.author.clone());
            }
            messages.push(message);
        }

        messages.reverse();
        messages.sort_by_key(|m| m.timestamp);

        Self { messages, authors }
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn authors(&self) -> &[String] {
        &self.authors
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConversationMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|m| &m.id == id)
    }
}

impl<'a> IntoIterator for &'a ConversationWindow {
    type Item = &'a ConversationMessage;
    type IntoIter = std::slice::Iter<'a, ConversationMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
    }

    #[test]
    fn window_drops_duplicate_ids() {
        let collected = vec![
            ConversationMessage::new("3", "alice", at(3), "third"),
            ConversationMessage::new("2", "bob", at(2), "second"),
            ConversationMessage::new("3", "alice", at(3), "third again"),
            ConversationMessage::new("1", "alice", at(1), "first"),
        ];
        let window = ConversationWindow::from_collected(collected);
        assert_eq!(window.len(), 3);
        let ids: Vec<_> = window.iter().map(|m| m.id.0.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        // First occurrence wins
        assert_eq!(window.messages()[2].content, "third");
    }

    #[test]
    fn window_sorts_out_of_order_ancestors() {
        // Trigger, an old replied-to message, then a newer fetched page.
        let collected = vec![
            ConversationMessage::new("10", "alice", at(10), "trigger"),
            ConversationMessage::new("1", "bob", at(1), "old parent"),
            ConversationMessage::new("9", "carol", at(9), "recent"),
            ConversationMessage::new("8", "carol", at(8), "less recent"),
        ];
        let window = ConversationWindow::from_collected(collected);
        let times: Vec<_> = window.iter().map(|m| m.timestamp).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(window.messages().last().unwrap().content, "trigger");
    }

    #[test]
    fn authors_keep_encounter_order() {
        let collected = vec![
            ConversationMessage::new("3", "alice", at(3), "a"),
            ConversationMessage::new("2", "bob", at(2), "b"),
            ConversationMessage::new("1", "alice", at(1), "c"),
        ];
        let window = ConversationWindow::from_collected(collected);
        assert_eq!(window.authors(), &["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn detached_drops_nested_chain() {
        let parent = ConversationMessage::new("1", "bob", at(1), "parent");
        let child = ConversationMessage::new("2", "alice", at(2), "child").replying_to(parent);
        let detached = child.detached();
        assert!(detached.referenced.is_none());
        assert_eq!(detached.reply_to, Some(MessageId::from("1")));
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = ConversationMessage::new("42", "alice", at(5), "hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("referenced"));
        let parsed: ConversationMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, MessageId::from("42"));
        assert_eq!(parsed.content, "hello");
    }
}
