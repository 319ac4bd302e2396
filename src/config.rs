//! TOML configuration.
//!
//! Everything except `[db]` has defaults, so a minimal file is:
//!
//! ```toml
//! [db]
//! path = "./data/mtg.sqlite"
//! ```
//!
//! Secrets for the vector index and the chat provider can be left out of the
//! file and supplied through `UPSTASH_VECTOR_REST_URL`,
//! `UPSTASH_VECTOR_REST_TOKEN` and `OPENAI_API_KEY`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const VECTOR_URL_ENV: &str = "UPSTASH_VECTOR_REST_URL";
pub const VECTOR_TOKEN_ENV: &str = "UPSTASH_VECTOR_REST_TOKEN";
pub const OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cards: CardsConfig,
    #[serde(default)]
    pub vector_index: VectorIndexConfig,
    #[serde(default)]
    pub scryfall: ScryfallConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

/// Used by `mtg load-text` to split plain documents.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}

#[derive(Debug, Deserialize, Clone)]
pub struct CardsConfig {
    /// Minimum trigram similarity (exclusive) for a card name to match.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Number of FTS candidates re-scored per name.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: i64,
    #[serde(default = "default_excluded_layouts")]
    pub excluded_layouts: Vec<String>,
}

impl Default for CardsConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            candidate_k: default_candidate_k(),
            excluded_layouts: default_excluded_layouts(),
        }
    }
}

fn default_similarity_threshold() -> f64 {
    0.3
}
fn default_candidate_k() -> i64 {
    200
}
fn default_excluded_layouts() -> Vec<String> {
    vec!["art_series".to_string(), "token".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorIndexConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Matches must score strictly above this to be returned.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_partitions")]
    pub partitions: Vec<PartitionConfig>,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            top_k: default_top_k(),
            confidence_threshold: default_confidence_threshold(),
            upsert_batch_size: default_upsert_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            partitions: default_partitions(),
        }
    }
}

/// A logical slice of the vector index.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct PartitionConfig {
    /// Namespace name inside the index (`cr`, `gls`, `mtr`).
    pub namespace: String,
    /// Human-readable name used as the key in tool output.
    pub label: String,
}

impl PartitionConfig {
    pub fn new(namespace: &str, label: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            label: label.to_string(),
        }
    }
}

pub const TOURNAMENT_RULES_NS: &str = "mtr";
pub const COMPREHENSIVE_RULES_NS: &str = "cr";
pub const GLOSSARY_NS: &str = "gls";

fn default_top_k() -> usize {
    7
}
fn default_confidence_threshold() -> f64 {
    0.6
}
fn default_upsert_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_partitions() -> Vec<PartitionConfig> {
    vec![
        PartitionConfig::new(TOURNAMENT_RULES_NS, "Magic Tournament Rules"),
        PartitionConfig::new(COMPREHENSIVE_RULES_NS, "Magic Comprehensive Rules"),
        PartitionConfig::new(GLOSSARY_NS, "Magic Comprehensive Glossary"),
    ]
}

impl VectorIndexConfig {
    /// REST URL from the file, falling back to `UPSTASH_VECTOR_REST_URL`.
    pub fn resolved_url(&self) -> Result<String> {
        resolve_secret(self.url.as_deref(), VECTOR_URL_ENV)
    }

    /// REST token from the file, falling back to `UPSTASH_VECTOR_REST_TOKEN`.
    pub fn resolved_token(&self) -> Result<String> {
        resolve_secret(self.token.as_deref(), VECTOR_TOKEN_ENV)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScryfallConfig {
    #[serde(default = "default_scryfall_api_url")]
    pub api_url: String,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_max_cards")]
    pub max_cards: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ScryfallConfig {
    fn default() -> Self {
        Self {
            api_url: default_scryfall_api_url(),
            request_delay_ms: default_request_delay_ms(),
            max_cards: default_max_cards(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_scryfall_api_url() -> String {
    "https://api.scryfall.com".to_string()
}
fn default_request_delay_ms() -> u64 {
    100
}
fn default_max_cards() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_chat_model")]
    pub default_model: String,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub models: ChatModelsConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base: default_chat_api_base(),
            api_key: None,
            default_model: default_chat_model(),
            max_steps: default_max_steps(),
            max_retries: default_max_retries(),
            timeout_secs: default_chat_timeout_secs(),
            models: ChatModelsConfig::default(),
        }
    }
}

impl ChatConfig {
    pub fn resolved_api_key(&self) -> Result<String> {
        resolve_secret(self.api_key.as_deref(), OPENAI_KEY_ENV)
    }
}

/// Provider model names behind each chat model id.
#[derive(Debug, Deserialize, Clone)]
pub struct ChatModelsConfig {
    #[serde(default = "default_small_model")]
    pub small: String,
    #[serde(default = "default_large_model")]
    pub large: String,
    #[serde(default = "default_reasoning_model")]
    pub reasoning: String,
}

impl Default for ChatModelsConfig {
    fn default() -> Self {
        Self {
            small: default_small_model(),
            large: default_large_model(),
            reasoning: default_reasoning_model(),
        }
    }
}

fn default_chat_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_chat_model() -> String {
    "chat-model-large".to_string()
}
fn default_max_steps() -> usize {
    5
}
fn default_chat_timeout_secs() -> u64 {
    120
}
fn default_small_model() -> String {
    "gpt-5-nano".to_string()
}
fn default_large_model() -> String {
    "gpt-4.1-mini".to_string()
}
fn default_reasoning_model() -> String {
    "gpt-5-mini".to_string()
}

fn resolve_secret(configured: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(value) = configured.filter(|v| !v.trim().is_empty()) {
        return Ok(value.to_string());
    }
    match std::env::var(env_var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => bail!("{} environment variable is not defined", env_var),
    }
}

impl Config {
    /// Defaults everywhere, database under `./data`.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/mtg.sqlite"),
            },
            server: ServerConfig::default(),
            cards: CardsConfig::default(),
            vector_index: VectorIndexConfig::default(),
            scryfall: ScryfallConfig::default(),
            chat: ChatConfig::default(),
            chunking: ChunkingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate a TOML document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if !(0.0..=1.0).contains(&config.cards.similarity_threshold) {
        bail!("cards.similarity_threshold must be in [0.0, 1.0]");
    }
    if config.cards.candidate_k < 1 {
        bail!("cards.candidate_k must be >= 1");
    }

    let vi = &config.vector_index;
    if !(0.0..=1.0).contains(&vi.confidence_threshold) {
        bail!("vector_index.confidence_threshold must be in [0.0, 1.0]");
    }
    if vi.top_k == 0 || vi.top_k > 1000 {
        bail!("vector_index.top_k must be in 1..=1000");
    }
    if vi.upsert_batch_size == 0 {
        bail!("vector_index.upsert_batch_size must be > 0");
    }
    if vi.partitions.is_empty() {
        bail!("vector_index.partitions must not be empty");
    }
    let mut seen = HashSet::new();
    for p in &vi.partitions {
        if p.label.trim().is_empty() {
            bail!("partition '{}' needs a label", p.namespace);
        }
        if !seen.insert(p.namespace.as_str()) {
            bail!("duplicate partition namespace: '{}'", p.namespace);
        }
    }

    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }

    if config.chat.max_steps == 0 {
        bail!("chat.max_steps must be >= 1");
    }
    if crate::chat::ChatModel::from_id(&config.chat.default_model).is_none() {
        bail!(
            "Unknown chat.default_model: '{}'. Must be one of: {}",
            config.chat.default_model,
            crate::chat::ChatModel::ALL
                .iter()
                .map(|m| m.id())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_file_gets_defaults() {
        let cfg = parse_config("[db]\npath = \"/tmp/x.sqlite\"\n").unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:7340");
        assert_eq!(cfg.vector_index.top_k, 7);
        assert!((cfg.vector_index.confidence_threshold - 0.6).abs() < 1e-9);
        assert!((cfg.cards.similarity_threshold - 0.3).abs() < 1e-9);
        let namespaces: Vec<&str> = cfg
            .vector_index
            .partitions
            .iter()
            .map(|p| p.namespace.as_str())
            .collect();
        assert_eq!(namespaces, vec!["mtr", "cr", "gls"]);
        assert_eq!(cfg.chat.default_model, "chat-model-large");
    }

    #[test]
    fn test_custom_partitions() {
        let cfg = parse_config(
            r#"
[db]
path = "x.sqlite"

[vector_index]
top_k = 5
confidence_threshold = 0.75

[[vector_index.partitions]]
namespace = "cr"
label = "Rules"
"#,
        )
        .unwrap();
        assert_eq!(cfg.vector_index.partitions, vec![PartitionConfig::new("cr", "Rules")]);
        assert_eq!(cfg.vector_index.top_k, 5);
    }

    #[test]
    fn test_rejects_threshold_out_of_range() {
        let err = parse_config(
            "[db]\npath = \"x\"\n[vector_index]\nconfidence_threshold = 1.5\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("confidence_threshold"));
    }

    #[test]
    fn test_rejects_duplicate_namespaces() {
        let err = parse_config(
            r#"
[db]
path = "x"
[[vector_index.partitions]]
namespace = "cr"
label = "A"
[[vector_index.partitions]]
namespace = "cr"
label = "B"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_rejects_unknown_chat_model() {
        let err = parse_config("[db]\npath = \"x\"\n[chat]\ndefault_model = \"gpt\"\n").unwrap_err();
        assert!(err.to_string().contains("chat.default_model"));
    }

    #[test]
    fn test_example_config_parses() {
        let cfg = parse_config(include_str!("../config/mtg.example.toml")).unwrap();
        assert_eq!(cfg.vector_index.partitions.len(), 3);
        assert_eq!(cfg.chunking.max_tokens, 700);
        assert!(cfg.vector_index.url.is_none());
    }

    #[test]
    fn test_configured_secret_wins() {
        let vi = VectorIndexConfig {
            url: Some("https://example.upstash.io".to_string()),
            ..Default::default()
        };
        assert_eq!(vi.resolved_url().unwrap(), "https://example.upstash.io");
    }
}
