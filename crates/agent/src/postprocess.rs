//! Response post-processing.
//!
//! Cleans raw backend output into the text that is actually posted:
//!
//! 1. sentinel check (output containing it is never posted)
//! 2. single stop-suffix trim
//! 3. whitespace trim
//! 4. optional tag extraction
//! 5. persona speaker-prefix strip

use koboldcord_config::OutputTags;

use crate::context::StopSet;

/// Default marker a model emits to decline replying.
pub const DEFAULT_SENTINEL: &str = "<no_message>";

/// What to do with one piece of generated output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Post (or edit in) this text
    Text(String),
    /// Nothing usable yet; do not post
    Empty,
    /// The model chose not to reply
    Suppressed,
}

impl Reply {
    pub fn text(&self) -> Option<&str> {
        match self {
            Reply::Text(t) => Some(t),
            _ => None,
        }
    }
}

/// Turns raw backend output into a [`Reply`].
#[derive(Debug, Clone)]
pub struct PostProcessor {
    persona: String,
    sentinel: Option<String>,
    output_tags: Option<OutputTags>,
}

impl PostProcessor {
    /// A processor with the default sentinel and no tag extraction.
    pub fn new(persona: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            sentinel: Some(DEFAULT_SENTINEL.to_string()),
            output_tags: None,
        }
    }

    pub fn with_sentinel(mut self, sentinel: Option<String>) -> Self {
        self.sentinel = sentinel.filter(|s| !s.is_empty());
        self
    }

    pub fn with_output_tags(mut self, tags: Option<OutputTags>) -> Self {
        self.output_tags = tags;
        self
    }

    pub fn process(&self, raw: &str, stops: &StopSet) -> Reply {
        if let Some(sentinel) = &self.sentinel
            && raw.contains(sentinel.as_str())
        {
            return Reply::Suppressed;
        }

        let mut text = stops.trim_suffix(raw).trim();

        if let Some(tags) = &self.output_tags {
            match extract_between(text, &tags.open, &tags.close) {
                Some(inner) => text = inner.trim(),
                None => return Reply::Empty,
            }
        }

        let text = self.strip_speaker_prefix(text);
        if text.is_empty() {
            Reply::Empty
        } else {
            Reply::Text(text.to_string())
        }
    }

    /// Whether `raw` stops partway into the sentinel, as in `"<no_"`.
    ///
    /// Streamed output can show the first tokens of the sentinel a tick
    /// before the whole marker is there.
    pub fn ends_with_partial_sentinel(&self, raw: &str) -> bool {
        let Some(sentinel) = &self.sentinel else {
            return false;
        };
        let raw = raw.trim_end();
        sentinel
            .char_indices()
            .skip(1)
            .any(|(end, _)| raw.ends_with(&sentinel[..end]))
    }

    fn strip_speaker_prefix<'a>(&self, text: &'a str) -> &'a str {
        text.strip_prefix(self.persona.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .map(str::trim)
            .unwrap_or(text)
    }
}

/// The text strictly between the first `open` and the first `close` after it.
pub fn extract_between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let len = text[start..].find(close)?;
    Some(&text[start..start + len])
}
