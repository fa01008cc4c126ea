//! Prompt rendering.
//!
//! Turns a conversation window into a single prompt string laid out for the
//! selected template family. Every history entry is stop-trimmed before it is
//! embedded, and the model turn is always left open with the persona name as
//! a forced speaker prefix.

use koboldcord_config::EntryStyle;
use koboldcord_core::message::{ConversationMessage, ConversationWindow};
use koboldcord_core::persona::Persona;
use koboldcord_core::template::{ChatTemplate, TemplateFamily};
use std::sync::Arc;

use super::stops::StopSet;

/// Timestamp layout used in history entries.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Header opening the conversation block in the instruct layout.
pub const CONVERSATION_HEADER: &str = "### Conversation:";

/// Renders prompts for one template and persona.
#[derive(Debug, Clone)]
pub struct PromptRenderer {
    template: &'static ChatTemplate,
    persona: Arc<Persona>,
    entry_style: EntryStyle,
}

impl PromptRenderer {
    pub fn new(template: &'static ChatTemplate, persona: Arc<Persona>) -> Self {
        Self {
            template,
            persona,
            entry_style: EntryStyle::default(),
        }
    }

    pub fn with_entry_style(mut self, style: EntryStyle) -> Self {
        self.entry_style = style;
        self
    }

    pub fn template(&self) -> &'static ChatTemplate {
        self.template
    }

    /// Render the full prompt. Pure: the same inputs give the same string.
    pub fn render(&self, window: &ConversationWindow, stops: &StopSet) -> String {
        match self.template.family {
            TemplateFamily::TurnTag => self.render_turn_tag(window, stops),
            TemplateFamily::Instruct => self.render_instruct(window, stops),
            TemplateFamily::LegacyHeader => self.render_legacy(window, stops),
        }
    }

    /// System turn embeds the whole conversation through `{conversationBody}`.
    fn render_turn_tag(&self, window: &ConversationWindow, stops: &StopSet) -> String {
        let f = &self.template.format;
        let body = self.body(window, stops);
        let system = self.persona.system_prompt.render(
            &self.persona.name,
            &self.persona.description,
            Some(&body),
        );
        [
            f.system_start,
            system.as_str(),
            f.system_end,
            f.model_start,
            self.persona.speaker_prefix().as_str(),
        ]
        .concat()
    }

    /// Acknowledged system turn, then a user turn holding the conversation.
    fn render_instruct(&self, window: &ConversationWindow, stops: &StopSet) -> String {
        let f = &self.template.format;
        let system = self.system_without_body();
        let body = self.body(window, stops);
        [
            f.system_start,
            system.as_str(),
            f.system_end,
            f.user_start,
            CONVERSATION_HEADER,
            body.as_str(),
            f.user_end,
            f.model_start,
            self.persona.speaker_prefix().as_str(),
        ]
        .concat()
    }

    /// No system turn: the instruction header carries the persona paragraph
    /// followed by bare `author: content` lines.
    fn render_legacy(&self, window: &ConversationWindow, stops: &StopSet) -> String {
        let f = &self.template.format;
        let system = self.system_without_body();
        let lines: String = window
            .iter()
            .map(|m| format!("\n{}: {}", m.author, stops.trim_suffix(&m.content)))
            .collect();
        [
            f.user_start,
            system.as_str(),
            "\n",
            lines.as_str(),
            f.user_end,
            f.model_start,
            self.persona.speaker_prefix().as_str(),
        ]
        .concat()
    }

    fn system_without_body(&self) -> String {
        self.persona
            .system_prompt
            .render(&self.persona.name, &self.persona.description, None)
    }

    /// All entries, each on its own line (preceded by `\n`).
    fn body(&self, window: &ConversationWindow, stops: &StopSet) -> String {
        window
            .iter()
            .map(|m| format!("\n{}", self.entry(m, stops)))
            .collect()
    }

    fn entry(&self, message: &ConversationMessage, stops: &StopSet) -> String {
        let timestamp = message.timestamp.format(TIMESTAMP_FORMAT);
        let content = stops.trim_suffix(&message.content);
        match self.entry_style {
            EntryStyle::Plain => format!("[{timestamp}] {}: {content}", message.author),
            EntryStyle::Xml => format!(
                "<message author=\"{}\" timestamp=\"{timestamp}\">{content}</message>",
                escape_attr(&message.author)
            ),
        }
    }
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}
