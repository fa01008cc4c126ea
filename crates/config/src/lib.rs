//! Configuration loading, validation, and management for koboldcord.
//!
//! Loads configuration from `--config <path>`, `./koboldcord.toml` or
//! `~/.koboldcord/config.toml` (first one found), then applies environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use koboldcord_core::backend::{BackendMode, SamplerSettings};
use koboldcord_core::persona::{Persona, PersonaPaths};
use koboldcord_core::template::{self, ChatTemplate};

pub use koboldcord_core::error::ConfigError;

/// Name of the project-local config file.
pub const LOCAL_CONFIG_FILE: &str = "koboldcord.toml";

/// The root configuration structure.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Name the bot speaks as; also selects `persona/<name>.txt`
    #[serde(default = "default_persona")]
    pub persona: String,

    /// Chat template name (see `koboldcord templates`)
    #[serde(default = "default_template")]
    pub template: String,

    /// Persona and system-prompt files
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Generation backend connection
    #[serde(default)]
    pub backend: BackendConfig,

    /// Sampling parameters sent with every request
    #[serde(default)]
    pub sampler: SamplerSettings,

    /// History collection
    #[serde(default)]
    pub history: HistoryConfig,

    /// Prompt entry style and reply post-processing
    #[serde(default)]
    pub response: ResponseConfig,

    /// Single-flight scope
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    /// Discord connection
    #[serde(default)]
    pub discord: DiscordConfig,
}

fn default_persona() -> String {
    "Kobold".into()
}
fn default_template() -> String {
    "gemma2".into()
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("persona", &self.persona)
            .field("template", &self.template)
            .field("prompt", &self.prompt)
            .field("backend", &self.backend)
            .field("sampler", &self.sampler)
            .field("history", &self.history)
            .field("response", &self.response)
            .field("concurrency", &self.concurrency)
            .field("discord", &self.discord)
            .finish()
    }
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("bot_token", &redact(&self.bot_token))
            .field("watch_status", &self.watch_status)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Directory holding `persona/` and `system/`
    #[serde(default = "default_prompt_dir")]
    pub dir: PathBuf,

    /// File name under `system/`
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_prompt_dir() -> PathBuf {
    PathBuf::from("prompt")
}
fn default_system_prompt() -> String {
    "default.txt".into()
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            dir: default_prompt_dir(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// KoboldCpp base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default)]
    pub mode: BackendMode,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on one polling session
    #[serde(default = "default_max_poll_secs")]
    pub max_poll_secs: u64,

    /// Per-request HTTP timeout (sync generate can take a while)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_url() -> String {
    "http://localhost:5001".into()
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_max_poll_secs() -> u64 {
    300
}
fn default_request_timeout_secs() -> u64 {
    600
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            mode: BackendMode::default(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_secs: default_max_poll_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Messages fetched before the trigger (1..=100)
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    20
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            limit: default_history_limit(),
        }
    }
}

/// How each history entry is written into the prompt body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStyle {
    /// `[YYYY-MM-DD HH:MM:SS] author: content`
    #[default]
    Plain,
    /// `<message author=".." timestamp="..">content</message>`
    Xml,
}

/// Opening and closing tag around the part of the output to keep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTags {
    pub open: String,
    pub close: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    #[serde(default)]
    pub entry_style: EntryStyle,

    /// Output containing this marker is never posted. Empty disables it.
    #[serde(default = "default_sentinel")]
    pub sentinel: String,

    /// Only respond when mentioned (by account or persona name)
    #[serde(default = "default_true")]
    pub mention_gated: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tags: Option<OutputTags>,
}

fn default_sentinel() -> String {
    "<no_message>".into()
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            entry_style: EntryStyle::default(),
            sentinel: default_sentinel(),
            mention_gated: true,
            output_tags: None,
        }
    }
}

/// Granularity of the single-flight gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightScope {
    /// One generation at a time for the whole process
    #[default]
    Global,
    /// One generation at a time per chat channel
    PerChannel,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default)]
    pub scope: FlightScope,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    /// Shown as "Watching <status>"
    #[serde(default = "default_watch_status")]
    pub watch_status: String,
}

fn default_watch_status() -> String {
    "for mentions".into()
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            watch_status: default_watch_status(),
        }
    }
}

impl AppConfig {
    /// Load configuration for the process.
    ///
    /// Resolution order: `explicit` path (must exist), `./koboldcord.toml`,
    /// `~/.koboldcord/config.toml`, built-in defaults. Environment overrides:
    /// - `DISCORD_TOKEN` → `discord.bot_token`
    /// - `API_URL` → `backend.api_url`
    /// - `PERSONA` → `persona`
    /// - `KOBOLDCORD_TEMPLATE` → `template`
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::ReadError {
                        path: path.to_path_buf(),
                        reason: "file does not exist".into(),
                    });
                }
                Self::parse_file(path)?
            }
            None => {
                let local = PathBuf::from(LOCAL_CONFIG_FILE);
                if local.exists() {
                    Self::parse_file(&local)?
                } else {
                    Self::parse_file(&Self::config_dir().join("config.toml"))?
                }
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::parse_file(path)?;
        config.validate()?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Apply environment overrides using `get` to read variables.
    ///
    /// Empty values are ignored.
    pub fn apply_env_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("DISCORD_TOKEN") {
            self.discord.bot_token = Some(token);
        }
        if let Some(url) = get("API_URL") {
            self.backend.api_url = url;
        }
        if let Some(persona) = get("PERSONA") {
            self.persona = persona;
        }
        if let Some(template) = get("KOBOLDCORD_TEMPLATE") {
            self.template = template;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".koboldcord")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        template::lookup(&self.template)?;

        if self.persona.trim().is_empty() {
            return Err(ConfigError::ValidationError("persona must not be empty".into()));
        }

        if self.backend.api_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "backend.api_url must not be empty".into(),
            ));
        }

        if !(0.0..=2.0).contains(&self.sampler.temperature) {
            return Err(ConfigError::ValidationError(
                "sampler.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !self.sampler.has_valid_order() {
            return Err(ConfigError::ValidationError(format!(
                "sampler.sampler_order must be a permutation of 0..n, got {:?}",
                self.sampler.sampler_order
            )));
        }

        if self.backend.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "backend.poll_interval_ms must be > 0".into(),
            ));
        }

        if !(1..=100).contains(&self.history.limit) {
            return Err(ConfigError::ValidationError(
                "history.limit must be between 1 and 100".into(),
            ));
        }

        if let Some(tags) = &self.response.output_tags
            && (tags.open.is_empty() || tags.close.is_empty())
        {
            return Err(ConfigError::ValidationError(
                "response.output_tags needs non-empty open and close tags".into(),
            ));
        }

        Ok(())
    }

    /// The configured chat template.
    pub fn chat_template(&self) -> Result<&'static ChatTemplate, ConfigError> {
        template::lookup(&self.template)
    }

    pub fn persona_paths(&self) -> PersonaPaths {
        PersonaPaths::in_dir(&self.prompt.dir, &self.persona, &self.prompt.system_prompt)
    }

    /// Read and validate the persona files for the configured template.
    pub fn load_persona(&self) -> Result<Persona, ConfigError> {
        let template = self.chat_template()?;
        Persona::load(&self.persona, &self.persona_paths(), template.family)
    }

    /// Sentinel marker, if enabled.
    pub fn sentinel(&self) -> Option<&str> {
        Some(self.response.sentinel.as_str()).filter(|s| !s.is_empty())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.backend.poll_interval_ms)
    }

    pub fn max_poll(&self) -> Duration {
        Duration::from_secs(self.backend.max_poll_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_secs)
    }

    /// Check if a Discord token is available (from config or environment).
    pub fn has_discord_token(&self) -> bool {
        self.discord.bot_token.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            persona: default_persona(),
            template: default_template(),
            prompt: PromptConfig::default(),
            backend: BackendConfig::default(),
            sampler: SamplerSettings::default(),
            history: HistoryConfig::default(),
            response: ResponseConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            discord: DiscordConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}
