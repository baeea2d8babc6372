//! Configuration loading and typed config structures.
//!
//! The canonical configuration lives in a YAML file (default
//! `xiuxian-config.yaml` at the working directory). This module defines
//! strongly-typed structs mirroring the YAML layout, with defaults for
//! every key, range validation, and environment overrides for secrets.
//!
//! Configuration problems are startup-fatal: the engine exits non-zero
//! rather than running with a half-formed world.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        #[from]
        source: serde_yml::Error,
    },

    /// A value was outside its allowed range.
    #[error("invalid config: {reason}")]
    Invalid {
        /// What was wrong.
        reason: String,
    },
}

/// Top-level simulation configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimConfig {
    /// World seeding and pacing.
    #[serde(default)]
    pub game: GameConfig,

    /// Social mechanics tuning.
    #[serde(default)]
    pub social: SocialConfig,

    /// AI concurrency settings.
    #[serde(default)]
    pub ai: AiConfig,

    /// LLM endpoint settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Filesystem locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Process-level settings.
    #[serde(default)]
    pub system: SystemConfig,
}

impl SimConfig {
    /// Load configuration from a YAML file, apply environment
    /// overrides, and validate.
    ///
    /// The `LLM_API_KEY` environment variable overrides `llm.key` so
    /// secrets can stay out of the file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or
    /// validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string (same pipeline as
    /// [`Self::from_file`]).
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        if let Ok(key) = std::env::var("LLM_API_KEY")
            && !key.is_empty()
        {
            config.llm.key = key;
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn probability(name: &str, value: f64) -> Result<(), ConfigError> {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    reason: format!("{name} must be within 0..=1, got {value}"),
                })
            }
        }

        probability("game.npc_awakening_rate_per_month", self.game.npc_awakening_rate_per_month)?;
        probability("game.fortune_probability", self.game.fortune_probability)?;
        probability("game.misfortune_probability", self.game.misfortune_probability)?;

        if self.game.max_action_rounds_per_turn == 0 {
            return Err(ConfigError::Invalid {
                reason: "game.max_action_rounds_per_turn must be at least 1".to_owned(),
            });
        }
        if self.ai.max_concurrent_requests == 0 {
            return Err(ConfigError::Invalid {
                reason: "ai.max_concurrent_requests must be at least 1".to_owned(),
            });
        }
        if !matches!(self.llm.mode.as_str(), "openai" | "anthropic" | "scripted") {
            return Err(ConfigError::Invalid {
                reason: format!("llm.mode must be openai, anthropic, or scripted, got {}", self.llm.mode),
            });
        }
        if !SUPPORTED_LANGUAGES.contains(&self.system.language.as_str()) {
            return Err(ConfigError::Invalid {
                reason: format!("system.language must be one of {SUPPORTED_LANGUAGES:?}"),
            });
        }
        Ok(())
    }
}

/// Locale tags the UI and static data support.
pub const SUPPORTED_LANGUAGES: &[&str] = &["en", "zh"];

/// World seeding and pacing settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GameConfig {
    /// Avatars spawned at world init.
    #[serde(default = "default_init_npc_num")]
    pub init_npc_num: u32,

    /// Sects seeded at world init.
    #[serde(default = "default_sect_num")]
    pub sect_num: u32,

    /// Monthly probability that a mortal awakens.
    #[serde(default = "default_awakening_rate")]
    pub npc_awakening_rate_per_month: f64,

    /// Calendar year the world starts in.
    #[serde(default = "default_start_year")]
    pub start_year: u64,

    /// Optional world-history text fed into prompts.
    #[serde(default)]
    pub world_history: String,

    /// Cap on same-month action re-execution rounds (preemption).
    #[serde(default = "default_max_action_rounds")]
    pub max_action_rounds_per_turn: u32,

    /// Monthly fortune probability per avatar.
    #[serde(default = "default_fortune_probability")]
    pub fortune_probability: f64,

    /// Monthly misfortune probability per avatar.
    #[serde(default = "default_misfortune_probability")]
    pub misfortune_probability: f64,

    /// Years after death before an avatar is forgotten.
    #[serde(default = "default_long_dead_cleanup_years")]
    pub long_dead_cleanup_years: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            init_npc_num: default_init_npc_num(),
            sect_num: default_sect_num(),
            npc_awakening_rate_per_month: default_awakening_rate(),
            start_year: default_start_year(),
            world_history: String::new(),
            max_action_rounds_per_turn: default_max_action_rounds(),
            fortune_probability: default_fortune_probability(),
            misfortune_probability: default_misfortune_probability(),
            long_dead_cleanup_years: default_long_dead_cleanup_years(),
        }
    }
}

/// Social mechanics tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SocialConfig {
    /// Interactions needed before a pair goes to the relation resolver.
    #[serde(default = "default_relation_check_threshold")]
    pub relation_check_threshold: u32,

    /// Major events kept in LLM context.
    #[serde(default = "default_major_event_context_num")]
    pub major_event_context_num: u32,

    /// Minor events kept in LLM context.
    #[serde(default = "default_minor_event_context_num")]
    pub minor_event_context_num: u32,
}

impl Default for SocialConfig {
    fn default() -> Self {
        Self {
            relation_check_threshold: default_relation_check_threshold(),
            major_event_context_num: default_major_event_context_num(),
            minor_event_context_num: default_minor_event_context_num(),
        }
    }
}

/// AI concurrency settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AiConfig {
    /// Cap on in-flight LLM requests.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

/// LLM endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LlmConfig {
    /// API base URL.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// API key (overridable via `LLM_API_KEY`).
    #[serde(default)]
    pub key: String,

    /// Model for context-heavy tasks.
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Model for fast one-line tasks.
    #[serde(default = "default_fast_model_name")]
    pub fast_model_name: String,

    /// Backend protocol: `openai`, `anthropic`, or `scripted`.
    #[serde(default = "default_llm_mode")]
    pub mode: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            key: String::new(),
            model_name: default_model_name(),
            fast_model_name: default_fast_model_name(),
            mode: default_llm_mode(),
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PathsConfig {
    /// Directory holding saves.
    #[serde(default = "default_saves_dir")]
    pub saves: PathBuf,

    /// Directory holding LLM prompt templates.
    #[serde(default = "default_templates_dir")]
    pub templates: PathBuf,

    /// Directory holding CSV static data.
    #[serde(default = "default_game_configs_dir")]
    pub game_configs: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            saves: default_saves_dir(),
            templates: default_templates_dir(),
            game_configs: default_game_configs_dir(),
        }
    }
}

/// Process-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SystemConfig {
    /// UI locale tag.
    #[serde(default = "default_language")]
    pub language: String,

    /// Address the server binds to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the server listens on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_init_npc_num() -> u32 {
    30
}
fn default_sect_num() -> u32 {
    4
}
fn default_awakening_rate() -> f64 {
    0.01
}
fn default_start_year() -> u64 {
    100
}
fn default_max_action_rounds() -> u32 {
    3
}
fn default_fortune_probability() -> f64 {
    0.03
}
fn default_misfortune_probability() -> f64 {
    0.02
}
fn default_long_dead_cleanup_years() -> u64 {
    20
}
fn default_relation_check_threshold() -> u32 {
    3
}
fn default_major_event_context_num() -> u32 {
    10
}
fn default_minor_event_context_num() -> u32 {
    20
}
fn default_max_concurrent_requests() -> u32 {
    16
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_owned()
}
fn default_model_name() -> String {
    "gpt-4o".to_owned()
}
fn default_fast_model_name() -> String {
    "gpt-4o-mini".to_owned()
}
fn default_llm_mode() -> String {
    "scripted".to_owned()
}
fn default_saves_dir() -> PathBuf {
    PathBuf::from("saves")
}
fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}
fn default_game_configs_dir() -> PathBuf {
    PathBuf::from("game_configs")
}
fn default_language() -> String {
    "en".to_owned()
}
fn default_host() -> String {
    "0.0.0.0".to_owned()
}
fn default_port() -> u16 {
    8080
}
