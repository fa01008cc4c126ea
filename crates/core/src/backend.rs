//! GenerationBackend trait: the abstraction over text-generation servers.
//!
//! A backend takes a fully rendered prompt plus sampling parameters and
//! returns decoded text, either in one synchronous call or through a
//! submit-then-poll protocol where each poll returns the text decoded so far.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;

/// Sampling configuration sent with every request.
///
/// Field names match the KoboldCpp generate API on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerSettings {
    pub max_context_length: u32,
    pub max_length: u32,
    pub temperature: f32,
    pub dynatemp_range: f32,
    pub top_p: f32,
    pub min_p: f32,
    pub top_k: u32,
    pub top_a: f32,
    pub typical: f32,
    pub tfs: f32,
    pub rep_pen: f32,
    pub rep_pen_range: u32,
    pub rep_pen_slope: f32,
    /// Explicit sampler permutation; must contain each index exactly once.
    pub sampler_order: Vec<u8>,
    /// -1 picks a random seed per request.
    pub sampler_seed: i64,
    #[serde(rename = "use_default_badwordsids")]
    pub ban_tokens: bool,
    pub trim_stop: bool,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            max_context_length: 16384,
            max_length: 250,
            temperature: 0.4,
            dynatemp_range: 0.0,
            top_p: 1.0,
            min_p: 0.05,
            top_k: 0,
            top_a: 0.0,
            typical: 1.0,
            tfs: 1.0,
            rep_pen: 1.0,
            rep_pen_range: 1024,
            rep_pen_slope: 0.0,
            sampler_order: vec![6, 0, 1, 3, 4, 2, 5],
            sampler_seed: -1,
            ban_tokens: false,
            trim_stop: true,
        }
    }
}

impl SamplerSettings {
    /// Whether `sampler_order` is a permutation of `0..len`.
    pub fn has_valid_order(&self) -> bool {
        let mut seen = vec![false; self.sampler_order.len()];
        for &idx in &self.sampler_order {
            match seen.get_mut(idx as usize) {
                Some(slot) if !*slot => *slot = true,
                _ => return false,
            }
        }
        !self.sampler_order.is_empty()
    }
}

/// A complete generation request. Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Sampling parameters
    #[serde(flatten)]
    pub sampler: SamplerSettings,

    /// Strings that end generation when produced
    pub stop_sequence: Vec<String>,

    /// The fully rendered prompt
    pub prompt: String,
}

/// Result of one status poll in asynchronous mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationStatus {
    /// The backend has nothing to report yet.
    Pending,
    /// Text decoded so far (or the final text once generation finished).
    Ready(String),
}

/// How the session controller talks to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// One blocking call returns the final text.
    Sync,
    /// Submit, then poll `check` until the text stops changing.
    #[default]
    Async,
}

/// The core GenerationBackend trait.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// A human-readable name for this backend (e.g., "koboldcpp").
    fn name(&self) -> &str;

    /// Generate synchronously and return the final text.
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<String, GenerationError>;

    /// Start a generation without waiting for it to finish.
    async fn submit(&self, request: &GenerationRequest)
    -> std::result::Result<(), GenerationError>;

    /// Poll the status of the most recently submitted generation.
    async fn check(&self) -> std::result::Result<GenerationStatus, GenerationError>;

    /// Ask the backend to stop the current generation.
    async fn abort(&self) -> std::result::Result<(), GenerationError> {
        Ok(())
    }

    /// Health check: can we reach the backend?
    async fn health_check(&self) -> std::result::Result<bool, GenerationError> {
        Ok(true)
    }
}
