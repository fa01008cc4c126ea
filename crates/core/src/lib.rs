//! # koboldcord core
//!
//! Domain types, traits, and error definitions for koboldcord.
//! This crate has **no platform or HTTP dependencies**. It defines the
//! domain model that the backend, channel and agent crates implement against.
//!
//! The two seams are [`GenerationBackend`] (the text-generation server) and
//! [`Channel`] (the chat platform). Everything between them, from history
//! collection to reconciling partial output, lives in `koboldcord-agent`.

pub mod backend;
pub mod channel;
pub mod error;
pub mod event;
pub mod message;
pub mod persona;
pub mod template;

// Re-export key types at crate root for ergonomics
pub use backend::{BackendMode, GenerationBackend, GenerationRequest, GenerationStatus, SamplerSettings};
pub use channel::{Channel, ChannelId, InboundMessage, MessageHandle};
pub use error::{ChannelError, ConfigError, Error, GenerationError, Result};
pub use event::{DomainEvent, EventBus};
pub use message::{ConversationMessage, ConversationWindow, MessageId};
pub use persona::{Persona, PersonaPaths, SystemPrompt};
pub use template::{ChatTemplate, ModelFormat, Slot, TemplateFamily};
