//! Process configuration and per-project profile configuration.
//!
//! There is no global mutable config: a [`Config`] value is built once and
//! threaded into each component at construction. Per-project overrides live
//! in [`ProfileConfig`] and are merged against the process defaults at the
//! point of use via [`ProfileConfig::resolve`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, Result};

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Keep raw chat blobs after a successful flush. When false (the
    /// default) chat blobs are ephemeral: their derived profile/event rows
    /// survive, the raw transcript does not.
    #[serde(default)]
    pub persistent_chat_blobs: bool,

    /// Idle-trigger threshold: admit flushes the buffer when the newest
    /// idle entry is older than this.
    #[serde(default = "default_buffer_flush_interval_secs")]
    pub buffer_flush_interval_secs: u64,

    /// Size-trigger threshold: admit flushes when the idle token sum
    /// exceeds this.
    #[serde(default = "default_max_buffer_token_size")]
    pub max_chat_blob_buffer_token_size: usize,

    /// Ceiling on sub_topics per topic in the default taxonomy prompt.
    #[serde(default = "default_max_profile_subtopics")]
    pub max_profile_subtopics: usize,

    /// Token ceiling per profile entry; merged content above it is
    /// re-summarized before persisting.
    #[serde(default = "default_max_pre_profile_token_size")]
    pub max_pre_profile_token_size: usize,

    /// Separator used in structured LLM output lines.
    #[serde(default = "default_llm_tab_separator")]
    pub llm_tab_separator: String,

    /// TTL for cached profile reads.
    #[serde(default = "default_cache_user_profiles_ttl_secs")]
    pub cache_user_profiles_ttl_secs: u64,

    /// Default language for prompts; projects may override.
    #[serde(default)]
    pub language: Language,

    /// Record a summarized "event tip" on each flush event.
    #[serde(default)]
    pub enable_event_summary: bool,

    /// Default theme requirement for event tips; projects may override.
    #[serde(default)]
    pub event_theme_requirement: Option<String>,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub lock: LockConfig,
}

fn default_buffer_flush_interval_secs() -> u64 {
    60 * 60
}

fn default_max_buffer_token_size() -> usize {
    1024
}

fn default_max_profile_subtopics() -> usize {
    15
}

fn default_max_pre_profile_token_size() -> usize {
    512
}

fn default_llm_tab_separator() -> String {
    "::".into()
}

fn default_cache_user_profiles_ttl_secs() -> u64 {
    60 * 20
}

impl Default for Config {
    fn default() -> Self {
        Self {
            persistent_chat_blobs: false,
            buffer_flush_interval_secs: default_buffer_flush_interval_secs(),
            max_chat_blob_buffer_token_size: default_max_buffer_token_size(),
            max_profile_subtopics: default_max_profile_subtopics(),
            max_pre_profile_token_size: default_max_pre_profile_token_size(),
            llm_tab_separator: default_llm_tab_separator(),
            cache_user_profiles_ttl_secs: default_cache_user_profiles_ttl_secs(),
            language: Language::default(),
            enable_event_summary: false,
            event_theme_requirement: None,
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            lock: LockConfig::default(),
        }
    }
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml_str(&raw)
    }

    fn validate(&self) -> Result<()> {
        if self.max_chat_blob_buffer_token_size == 0 {
            return Err(ConfigError::Validation(
                "max_chat_blob_buffer_token_size must be positive".into(),
            )
            .into());
        }
        if self.max_pre_profile_token_size == 0 {
            return Err(ConfigError::Validation(
                "max_pre_profile_token_size must be positive".into(),
            )
            .into());
        }
        if self.llm_tab_separator.is_empty() {
            return Err(
                ConfigError::Validation("llm_tab_separator must not be empty".into()).into(),
            );
        }
        Ok(())
    }

    pub fn buffer_flush_interval(&self) -> Duration {
        Duration::from_secs(self.buffer_flush_interval_secs)
    }

    pub fn cache_user_profiles_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_user_profiles_ttl_secs)
    }
}

// ── LLM / embedding provider config ──────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_best_llm_model")]
    pub best_llm_model: String,
    /// Model for event-tip summaries; falls back to `best_llm_model`.
    #[serde(default)]
    pub summary_llm_model: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_best_llm_model() -> String {
    "gpt-4o-mini".into()
}

fn default_llm_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            best_llm_model: default_best_llm_model(),
            summary_llm_model: None,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "openai" or "none".
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dim")]
    pub dim: usize,
    /// Embed inputs are cut to this many tokens before the provider call.
    #[serde(default = "default_embedding_max_token_size")]
    pub max_token_size: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_provider() -> String {
    "openai".into()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_embedding_dim() -> usize {
    1536
}

fn default_embedding_max_token_size() -> usize {
    8192
}

fn default_embedding_timeout_secs() -> u64 {
    10
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            base_url: None,
            api_key: None,
            model: default_embedding_model(),
            dim: default_embedding_dim(),
            max_token_size: default_embedding_max_token_size(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lease duration: a holder past this is considered expired.
    #[serde(default = "default_lock_hold_timeout_secs")]
    pub hold_timeout_secs: u64,
    /// Bounded wait for acquisition before returning a Timeout error.
    #[serde(default = "default_lock_blocking_timeout_secs")]
    pub blocking_timeout_secs: u64,
}

fn default_lock_hold_timeout_secs() -> u64 {
    128
}

fn default_lock_blocking_timeout_secs() -> u64 {
    32
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            hold_timeout_secs: default_lock_hold_timeout_secs(),
            blocking_timeout_secs: default_lock_blocking_timeout_secs(),
        }
    }
}

impl LockConfig {
    pub fn hold_timeout(&self) -> Duration {
        Duration::from_secs(self.hold_timeout_secs)
    }

    pub fn blocking_timeout(&self) -> Duration {
        Duration::from_secs(self.blocking_timeout_secs)
    }
}

// ── Prompt language ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Zh,
}

// ── Per-project profile configuration ────────────────────────────

/// One sub_topic slot of the taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubTopic {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Project instruction for how merges on this slot should behave.
    #[serde(default)]
    pub update_description: Option<String>,
    /// Run the per-fact validation pass for this slot. Requires a
    /// description to judge against.
    #[serde(default)]
    pub validate_value: bool,
}

impl SubTopic {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            update_description: None,
            validate_value: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileTopic {
    pub topic: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sub_topics: Vec<SubTopic>,
}

impl ProfileTopic {
    pub fn new(topic: impl Into<String>, sub_topics: Vec<SubTopic>) -> Self {
        Self {
            topic: topic.into(),
            description: None,
            sub_topics,
        }
    }
}

/// Per-project overrides of taxonomy, language and extraction behavior.
/// Read-mostly; supplied to the extraction/merge engines as plain data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub language: Option<Language>,
    /// Restrict extracted facts to the declared (topic, sub_topic) set.
    #[serde(default)]
    pub profile_strict_mode: bool,
    /// Replace the default taxonomy entirely.
    #[serde(default)]
    pub overwrite_user_profiles: Option<Vec<ProfileTopic>>,
    /// Extend the default taxonomy.
    #[serde(default)]
    pub additional_user_profiles: Vec<ProfileTopic>,
    #[serde(default)]
    pub event_theme_requirement: Option<String>,
}

/// Upper bound on a stored project config document.
const MAX_PROFILE_CONFIG_LEN: usize = 65535;

impl ProfileConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        if raw.len() > MAX_PROFILE_CONFIG_LEN {
            return Err(ConfigError::Validation(format!(
                "profile config exceeds {MAX_PROFILE_CONFIG_LEN} bytes"
            ))
            .into());
        }
        let config: Self =
            toml::from_str(raw).map_err(|e| ConfigError::Load(e.to_string()))?;
        Ok(config)
    }

    /// Merge this project's overrides against the process defaults.
    #[must_use]
    pub fn resolve(&self, defaults: &Config) -> ResolvedProfileConfig {
        let topics = match &self.overwrite_user_profiles {
            Some(overwrite) => overwrite.clone(),
            None => {
                let mut topics = default_profile_topics();
                topics.extend(self.additional_user_profiles.iter().cloned());
                topics
            }
        };
        ResolvedProfileConfig {
            language: self.language.unwrap_or(defaults.language),
            strict_mode: self.profile_strict_mode,
            event_theme_requirement: self
                .event_theme_requirement
                .clone()
                .or_else(|| defaults.event_theme_requirement.clone()),
            topics,
        }
    }
}

/// Project config with process defaults already merged in.
#[derive(Debug, Clone)]
pub struct ResolvedProfileConfig {
    pub language: Language,
    pub strict_mode: bool,
    pub event_theme_requirement: Option<String>,
    pub topics: Vec<ProfileTopic>,
}

impl ResolvedProfileConfig {
    /// All declared (topic, sub_topic) pairs, unified for stable keying.
    #[must_use]
    pub fn allowed_pairs(&self) -> BTreeSet<(String, String)> {
        self.topics
            .iter()
            .flat_map(|topic| {
                topic.sub_topics.iter().map(|sub| {
                    (
                        crate::prompts::attribute_unify(&topic.topic),
                        crate::prompts::attribute_unify(&sub.name),
                    )
                })
            })
            .collect()
    }

    /// Look up a sub_topic slot by unified key.
    #[must_use]
    pub fn find_sub_topic(&self, topic: &str, sub_topic: &str) -> Option<&SubTopic> {
        self.topics
            .iter()
            .find(|t| crate::prompts::attribute_unify(&t.topic) == topic)
            .and_then(|t| {
                t.sub_topics
                    .iter()
                    .find(|s| crate::prompts::attribute_unify(&s.name) == sub_topic)
            })
    }

    /// Description of a topic (not sub_topic), if declared.
    #[must_use]
    pub fn topic_description(&self, topic: &str) -> Option<&str> {
        self.topics
            .iter()
            .find(|t| crate::prompts::attribute_unify(&t.topic) == topic)
            .and_then(|t| t.description.as_deref())
    }
}

/// Built-in candidate taxonomy, used unless a project overwrites it.
#[must_use]
pub fn default_profile_topics() -> Vec<ProfileTopic> {
    vec![
        ProfileTopic::new(
            "basic_info",
            vec![
                SubTopic::named("name"),
                SubTopic::named("age"),
                SubTopic::named("gender"),
                SubTopic::named("birthday"),
                SubTopic::named("location"),
            ],
        ),
        ProfileTopic::new(
            "education",
            vec![
                SubTopic::named("school"),
                SubTopic::named("major"),
                SubTopic::named("degree"),
            ],
        ),
        ProfileTopic::new(
            "work",
            vec![
                SubTopic::named("company"),
                SubTopic::named("title"),
                SubTopic::named("start_date"),
                SubTopic::named("goal"),
            ],
        ),
        ProfileTopic::new(
            "interest",
            vec![
                SubTopic::named("food"),
                SubTopic::named("sport"),
                SubTopic::named("music"),
                SubTopic::named("movie"),
            ],
        ),
        ProfileTopic::new(
            "life_event",
            vec![SubTopic::named("recent"), SubTopic::named("plan")],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.buffer_flush_interval_secs, 3600);
        assert_eq!(config.max_chat_blob_buffer_token_size, 1024);
        assert_eq!(config.max_pre_profile_token_size, 512);
        assert_eq!(config.llm_tab_separator, "::");
        assert_eq!(config.cache_user_profiles_ttl_secs, 1200);
        assert!(!config.persistent_chat_blobs);
        assert_eq!(config.lock.hold_timeout_secs, 128);
        assert_eq!(config.lock.blocking_timeout_secs, 32);
    }

    #[test]
    fn from_toml_overrides_and_validates() {
        let config =
            Config::from_toml_str("max_chat_blob_buffer_token_size = 64\nlanguage = \"zh\"")
                .unwrap();
        assert_eq!(config.max_chat_blob_buffer_token_size, 64);
        assert_eq!(config.language, Language::Zh);

        let err = Config::from_toml_str("max_chat_blob_buffer_token_size = 0").unwrap_err();
        assert!(err.to_string().contains("must be positive"));
    }

    #[test]
    fn resolve_extends_default_taxonomy() {
        let project = ProfileConfig {
            additional_user_profiles: vec![ProfileTopic::new(
                "diet",
                vec![SubTopic::named("preference")],
            )],
            ..ProfileConfig::default()
        };
        let resolved = project.resolve(&Config::default());
        assert!(resolved
            .allowed_pairs()
            .contains(&("diet".into(), "preference".into())));
        assert!(resolved
            .allowed_pairs()
            .contains(&("basic_info".into(), "age".into())));
    }

    #[test]
    fn resolve_overwrite_replaces_taxonomy() {
        let project = ProfileConfig {
            overwrite_user_profiles: Some(vec![ProfileTopic::new(
                "work",
                vec![SubTopic::named("title")],
            )]),
            profile_strict_mode: true,
            ..ProfileConfig::default()
        };
        let resolved = project.resolve(&Config::default());
        assert!(resolved.strict_mode);
        assert_eq!(
            resolved.allowed_pairs().into_iter().collect::<Vec<_>>(),
            vec![("work".into(), "title".into())]
        );
    }

    #[test]
    fn resolve_language_falls_back_to_process_default() {
        let project = ProfileConfig::default();
        assert_eq!(project.resolve(&Config::default()).language, Language::En);

        let zh_project = ProfileConfig {
            language: Some(Language::Zh),
            ..ProfileConfig::default()
        };
        assert_eq!(
            zh_project.resolve(&Config::default()).language,
            Language::Zh
        );
    }

    #[test]
    fn find_sub_topic_uses_unified_keys() {
        let project = ProfileConfig {
            overwrite_user_profiles: Some(vec![ProfileTopic::new(
                "Work Life",
                vec![SubTopic {
                    name: "Job Title".into(),
                    description: Some("current title".into()),
                    update_description: None,
                    validate_value: true,
                }],
            )]),
            ..ProfileConfig::default()
        };
        let resolved = project.resolve(&Config::default());
        let slot = resolved.find_sub_topic("work_life", "job_title").unwrap();
        assert!(slot.validate_value);
        assert_eq!(slot.description.as_deref(), Some("current title"));
    }

    #[test]
    fn oversized_profile_config_is_rejected() {
        let raw = format!("event_theme_requirement = \"{}\"", "x".repeat(70000));
        assert!(ProfileConfig::from_toml_str(&raw).is_err());
    }
}
