//! Error types for the koboldcord domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] wraps them all.

use std::path::PathBuf;
use thiserror::Error;

/// The top-level error type for all koboldcord operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Generation backend errors ---
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    // --- Chat platform errors ---
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    // --- Configuration errors ---
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures talking to the text-generation backend.
///
/// Any of these aborts the current generation session. They are logged and
/// never retried.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Generation timed out after {after_secs}s")]
    Timeout { after_secs: u64 },

    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("Backend not configured: {0}")]
    NotConfigured(String),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Message delivery failed to {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    /// Non-fatal: the collector falls back to the reply chain alone.
    #[error("History fetch failed in {channel}: {reason}")]
    HistoryFetch { channel: String, reason: String },

    #[error("Channel connection lost: {0}")]
    ConnectionLost(String),

    #[error("Invalid platform payload: {0}")]
    InvalidPayload(String),
}

/// Startup configuration errors. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown chat template '{0}'")]
    UnknownTemplate(String),

    #[error("Required file missing at {path}: {reason}")]
    MissingFile { path: PathBuf, reason: String },

    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("System prompt slots do not match the {family} template family: {reason}")]
    SlotMismatch { family: String, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
