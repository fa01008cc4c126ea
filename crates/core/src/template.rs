//! Chat template registry.
//!
//! Every supported model family delimits system/user/model turns with its own
//! token strings. The registry is a fixed table: deployments pick one entry by
//! name at startup and never mutate it.
//!
//! Families:
//! - **TurnTag**: `<start_of_turn>role ... <end_of_turn>` style (Gemma, ChatML).
//!   The conversation body is embedded in the system prompt itself.
//! - **Instruct**: `[INST] ... [/INST]` style (Mistral) with an explicit
//!   acknowledgment closing the system turn.
//! - **LegacyHeader**: `### Instruction:` / `### Response:` headers with no
//!   persistent system turn (Alpaca).

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The six delimiter strings of a chat format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelFormat {
    pub system_start: &'static str,
    pub system_end: &'static str,
    pub user_start: &'static str,
    pub user_end: &'static str,
    pub model_start: &'static str,
    pub model_end: &'static str,
}

/// Layout family of a chat template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateFamily {
    TurnTag,
    Instruct,
    LegacyHeader,
}

/// A named substitution slot in a system-prompt template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Persona,
    PersonaDescription,
    ConversationBody,
}

impl Slot {
    pub const ALL: [Slot; 3] = [Slot::Persona, Slot::PersonaDescription, Slot::ConversationBody];

    /// Identifier between the braces, e.g. `persona` for `{persona}`.
    pub fn ident(self) -> &'static str {
        match self {
            Slot::Persona => "persona",
            Slot::PersonaDescription => "personaDescription",
            Slot::ConversationBody => "conversationBody",
        }
    }

    pub fn from_ident(ident: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.ident() == ident)
    }
}

impl TemplateFamily {
    /// Slots a system prompt must contain for this family.
    pub fn expected_slots(self) -> &'static [Slot] {
        match self {
            TemplateFamily::TurnTag => &Slot::ALL,
            TemplateFamily::Instruct | TemplateFamily::LegacyHeader => {
                &[Slot::Persona, Slot::PersonaDescription]
            }
        }
    }

    /// Header strings the family reserves as additional stop sequences.
    pub fn reserved_stops(self) -> &'static [&'static str] {
        match self {
            TemplateFamily::TurnTag => &[],
            TemplateFamily::Instruct => &["[INST]"],
            TemplateFamily::LegacyHeader => &["### Instruction:", "### Response:"],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TemplateFamily::TurnTag => "turn-tag",
            TemplateFamily::Instruct => "instruct",
            TemplateFamily::LegacyHeader => "legacy-header",
        }
    }
}

impl std::fmt::Display for TemplateFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A registry entry: name, family and delimiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatTemplate {
    pub name: &'static str,
    pub family: TemplateFamily,
    pub format: ModelFormat,
}

pub const GEMMA_V2: ChatTemplate = ChatTemplate {
    name: "gemma2",
    family: TemplateFamily::TurnTag,
    // Gemma has no system role; the system prompt rides in a user turn.
    format: ModelFormat {
        system_start: "<start_of_turn>user\n",
        system_end: "<end_of_turn>\n",
        user_start: "<start_of_turn>user\n",
        user_end: "<end_of_turn>\n",
        model_start: "<start_of_turn>model\n",
        model_end: "<end_of_turn>",
    },
};

pub const CHATML: ChatTemplate = ChatTemplate {
    name: "chatml",
    family: TemplateFamily::TurnTag,
    format: ModelFormat {
        system_start: "<|im_start|>system\n",
        system_end: "<|im_end|>\n",
        user_start: "<|im_start|>user\n",
        user_end: "<|im_end|>\n",
        model_start: "<|im_start|>assistant\n",
        model_end: "<|im_end|>",
    },
};

pub const MISTRAL_V2: ChatTemplate = ChatTemplate {
    name: "mistral",
    family: TemplateFamily::Instruct,
    format: ModelFormat {
        system_start: "[INST]",
        system_end: "[/INST]Understood.</s>",
        user_start: "[INST]",
        user_end: "[/INST]",
        model_start: "",
        model_end: "</s>",
    },
};

pub const ALPACA: ChatTemplate = ChatTemplate {
    name: "alpaca",
    family: TemplateFamily::LegacyHeader,
    format: ModelFormat {
        system_start: "",
        system_end: "",
        user_start: "### Instruction:\n",
        user_end: "\n\n",
        model_start: "### Response: (length = short)\n",
        model_end: "### Instruction:",
    },
};

/// Every registered template, in display order.
pub const REGISTRY: [&ChatTemplate; 4] = [&GEMMA_V2, &CHATML, &MISTRAL_V2, &ALPACA];

fn normalize(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '-' || c == '.' { '_' } else { c })
        .collect()
}

/// Look up a template by name or alias.
pub fn lookup(name: &str) -> Result<&'static ChatTemplate, ConfigError> {
    let template = match normalize(name).as_str() {
        "gemma2" | "gemma_2" | "gemma_v2" | "gemma" => &GEMMA_V2,
        "chatml" | "chat_ml" => &CHATML,
        "mistral" | "mistral_v2" => &MISTRAL_V2,
        "alpaca" | "legacy" => &ALPACA,
        _ => return Err(ConfigError::UnknownTemplate(name.to_string())),
    };
    Ok(template)
}

/// Registered template names.
pub fn names() -> impl Iterator<Item = &'static str> {
    REGISTRY.into_iter().map(|t| t.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_templates() {
        assert_eq!(lookup("gemma2").unwrap().family, TemplateFamily::TurnTag);
        assert_eq!(lookup("Mistral").unwrap().family, TemplateFamily::Instruct);
        assert_eq!(lookup("alpaca").unwrap().family, TemplateFamily::LegacyHeader);
        assert_eq!(lookup("chatml").unwrap().format.model_end, "<|im_end|>");
    }

    #[test]
    fn lookup_accepts_aliases() {
        assert_eq!(lookup("GEMMA-V2").unwrap().name, "gemma2");
        assert_eq!(lookup("mistral_v2").unwrap().name, "mistral");
        assert_eq!(lookup("legacy").unwrap().name, "alpaca");
    }

    #[test]
    fn lookup_unknown_fails_with_config_error() {
        let err = lookup("vicuna").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTemplate(ref n) if n == "vicuna"));
    }

    #[test]
    fn every_registered_name_resolves_to_itself() {
        for name in names() {
            assert_eq!(lookup(name).unwrap().name, name);
        }
    }

    #[test]
    fn instruct_system_turn_carries_acknowledgment() {
        assert!(MISTRAL_V2.format.system_end.contains("Understood."));
    }

    #[test]
    fn expected_slots_per_family() {
        assert!(TemplateFamily::TurnTag
            .expected_slots()
            .contains(&Slot::ConversationBody));
        assert!(!TemplateFamily::Instruct
            .expected_slots()
            .contains(&Slot::ConversationBody));
        assert_eq!(Slot::from_ident("personaDescription"), Some(Slot::PersonaDescription));
        assert_eq!(Slot::from_ident("nope"), None);
    }
}
