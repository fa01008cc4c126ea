//! Stop-sequence set.
//!
//! The same ordered list is sent to the backend as `stop_sequence` and used
//! locally to trim residual stop text off history entries and generated
//! output.

use koboldcord_core::message::ConversationWindow;
use koboldcord_core::template::ChatTemplate;

/// Generic separators models tend to emit when they drift off-turn.
pub const SEPARATORS: [&str; 3] = ["\n\n\n", "\n---", "\n(Note:"];

/// Ordered, unique, non-empty stop strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopSet {
    stops: Vec<String>,
}

impl StopSet {
    /// Build the stop set for a template and a collected window.
    ///
    /// Order: model-turn terminator, generic separators, family-reserved
    /// headers, then one `"\n<author>:"` per distinct author.
    pub fn build(template: &ChatTemplate, window: &ConversationWindow) -> Self {
        Self::from_authors(template, window.authors())
    }

    pub fn from_authors<S: AsRef<str>>(template: &ChatTemplate, authors: &[S]) -> Self {
        let mut set = Self::default();
        set.push(template.format.model_end);
        for sep in SEPARATORS {
            set.push(sep);
        }
        for reserved in template.family.reserved_stops() {
            set.push(*reserved);
        }
        for author in authors {
            set.push(author_stop(author.as_ref()));
        }
        set
    }

    /// Append `stop` unless it is empty or already present.
    pub fn push(&mut self, stop: impl Into<String>) {
        let stop = stop.into();
        if !stop.is_empty() && !self.stops.contains(&stop) {
            self.stops.push(stop);
        }
    }

    /// Remove the first stop string (in declaration order) that `text` ends
    /// with. At most one suffix is removed.
    pub fn trim_suffix<'a>(&self, text: &'a str) -> &'a str {
        self.stops
            .iter()
            .find_map(|stop| text.strip_suffix(stop.as_str()))
            .unwrap_or(text)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.stops
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.stops.clone()
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    pub fn contains(&self, stop: &str) -> bool {
        self.stops.iter().any(|s| s == stop)
    }
}

/// The stop string that marks `author` starting a new line.
pub fn author_stop(author: &str) -> String {
    format!("\n{author}:")
}
