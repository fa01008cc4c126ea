//! Persona: who the bot speaks as, and the system prompt that sets it up.
//!
//! Two files make up a persona (layout of the `prompt/` directory):
//!
//! 1. `persona/<name>.txt`: free-form description of the character
//! 2. `system/<file>`: the system-prompt template
//!
//! The template uses named slots (`{persona}`, `{personaDescription}`,
//! `{conversationBody}`). Slots are checked against the selected template
//! family when the persona is loaded, so a mismatch fails at startup instead
//! of silently producing a malformed prompt.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::template::{Slot, TemplateFamily};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Slot(Slot),
}

/// A validated system-prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPrompt {
    segments: Vec<Segment>,
    family: TemplateFamily,
}

impl SystemPrompt {
    /// Parse `text` and check its slots against `family`.
    pub fn parse(text: &str, family: TemplateFamily) -> Result<Self, ConfigError> {
        let mismatch = |reason: String| ConfigError::SlotMismatch {
            family: family.to_string(),
            reason,
        };

        let mut segments = Vec::new();
        let mut found: HashSet<Slot> = HashSet::new();
        let mut literal = String::new();
        let mut rest = text;

        while let Some(open) = rest.find('{') {
            let after = &rest[open + 1..];
            let candidate = after
                .find('}')
                .map(|close| &after[..close])
                .filter(|ident| is_slot_ident(ident));

            let Some(ident) = candidate else {
                // Not a slot (JSON, prose braces); keep the brace literally.
                literal.push_str(&rest[..=open]);
                rest = after;
                continue;
            };

            let slot = Slot::from_ident(ident)
                .ok_or_else(|| mismatch(format!("unknown slot {{{ident}}}")))?;
            if !family.expected_slots().contains(&slot) {
                return Err(mismatch(format!("slot {{{ident}}} is not used by this family")));
            }

            literal.push_str(&rest[..open]);
            if !literal.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Slot(slot));
            found.insert(slot);
            rest = &after[ident.len() + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Text(literal));
        }

        let missing: Vec<String> = family
            .expected_slots()
            .iter()
            .filter(|s| !found.contains(s))
            .map(|s| format!("{{{}}}", s.ident()))
            .collect();
        if !missing.is_empty() {
            return Err(mismatch(format!("missing slot(s) {}", missing.join(", "))));
        }

        Ok(Self { segments, family })
    }

    pub fn family(&self) -> TemplateFamily {
        self.family
    }

    /// Substitute the slots in a single pass.
    ///
    /// `body` is only consulted for `{conversationBody}`; substituted values
    /// are never re-scanned for slots.
    pub fn render(&self, persona: &str, description: &str, body: Option<&str>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Slot(Slot::Persona) => out.push_str(persona),
                Segment::Slot(Slot::PersonaDescription) => out.push_str(description),
                Segment::Slot(Slot::ConversationBody) => out.push_str(body.unwrap_or_default()),
            }
        }
        out
    }
}

fn is_slot_ident(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Where the persona files live.
#[derive(Debug, Clone)]
pub struct PersonaPaths {
    pub persona_file: PathBuf,
    pub system_prompt_file: PathBuf,
}

impl PersonaPaths {
    /// Standard layout under a prompt directory.
    pub fn in_dir(prompt_dir: &Path, persona: &str, system_prompt: &str) -> Self {
        Self {
            persona_file: prompt_dir.join("persona").join(format!("{persona}.txt")),
            system_prompt_file: prompt_dir.join("system").join(system_prompt),
        }
    }
}

/// The loaded persona, shared read-only for the life of the process.
#[derive(Debug, Clone)]
pub struct Persona {
    /// The name replies are authored as
    pub name: String,

    /// Character description substituted into the system prompt
    pub description: String,

    /// Validated system-prompt template
    pub system_prompt: SystemPrompt,
}

impl Persona {
    /// Load and validate the persona files.
    pub fn load(
        name: &str,
        paths: &PersonaPaths,
        family: TemplateFamily,
    ) -> Result<Self, ConfigError> {
        let description = read_required(&paths.persona_file)?;
        if description.trim().is_empty() {
            warn!(path = %paths.persona_file.display(), "Persona file appears to be empty");
        }

        let template = read_required(&paths.system_prompt_file)?;
        let system_prompt = SystemPrompt::parse(&template, family)?;

        debug!(persona = name, family = %family, "Persona loaded");

        Ok(Self {
            name: name.to_string(),
            description,
            system_prompt,
        })
    }

    /// Build a persona from in-memory text (tests, embedding).
    pub fn from_parts(
        name: &str,
        description: &str,
        system_prompt: &str,
        family: TemplateFamily,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            name: name.to_string(),
            description: description.to_string(),
            system_prompt: SystemPrompt::parse(system_prompt, family)?,
        })
    }

    /// The forced speaker prefix (`"Name:"`).
    pub fn speaker_prefix(&self) -> String {
        format!("{}:", self.name)
    }
}

fn read_required(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path)
        .map(|s| s.trim_end().to_string())
        .map_err(|e| ConfigError::MissingFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}
