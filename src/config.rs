//! TOML configuration.
//!
//! Every section except `[db]` is optional; missing fields fall back to
//! the defaults below. [`load_config`] parses and validates in one step so
//! the rest of the crate can trust the values it receives.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use auslaw_core::chunk::ChunkingParams;
use auslaw_core::search::SearchParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_small_doc_chars")]
    pub small_doc_chars: usize,
    #[serde(default = "default_parent_tokens")]
    pub parent_tokens: usize,
    #[serde(default = "default_child_tokens")]
    pub child_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            small_doc_chars: default_small_doc_chars(),
            parent_tokens: default_parent_tokens(),
            child_tokens: default_child_tokens(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkingParams {
        ChunkingParams {
            small_doc_chars: self.small_doc_chars,
            parent_tokens: self.parent_tokens,
            child_tokens: self.child_tokens,
        }
    }
}

fn default_small_doc_chars() -> usize {
    10_000
}
fn default_parent_tokens() -> usize {
    2000
}
fn default_child_tokens() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    #[serde(default = "default_rerank_top_n")]
    pub rerank_top_n: usize,
    #[serde(default)]
    pub min_rrf_score: f64,
    /// Per-call timeout for the store and query embedding.
    #[serde(default = "default_retrieval_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            candidate_limit: default_candidate_limit(),
            final_limit: default_final_limit(),
            rerank_top_n: default_rerank_top_n(),
            min_rrf_score: 0.0,
            timeout_secs: default_retrieval_timeout_secs(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> SearchParams {
        SearchParams {
            rrf_k: self.rrf_k,
            candidate_limit: self.candidate_limit,
            final_limit: self.final_limit,
            rerank_top_n: self.rerank_top_n,
            min_rrf_score: self.min_rrf_score,
        }
    }
}

fn default_rrf_k() -> f64 {
    60.0
}
fn default_candidate_limit() -> usize {
    20
}
fn default_final_limit() -> usize {
    5
}
fn default_rerank_top_n() -> usize {
    5
}
fn default_retrieval_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for Ollama (default `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Chat/structured-output model settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// Cheaper model used for safety and complexity fallbacks.
    #[serde(default = "default_classifier_model")]
    pub classifier_model: String,
    #[serde(default = "default_model_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            chat_model: default_chat_model(),
            classifier_model: default_classifier_model(),
            max_retries: default_model_max_retries(),
            timeout_secs: default_model_timeout_secs(),
            base_url: None,
        }
    }
}

fn default_chat_model() -> String {
    "gpt-4o".to_string()
}
fn default_classifier_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_model_max_retries() -> u32 {
    3
}
fn default_model_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankerConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_rerank_model")]
    pub model: String,
    #[serde(default = "default_rerank_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: default_rerank_model(),
            timeout_secs: default_rerank_timeout_secs(),
        }
    }
}

fn default_rerank_model() -> String {
    "rerank-english-v3.0".to_string()
}
fn default_rerank_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on any single stage's external calls.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    #[serde(default = "default_max_brief_rounds")]
    pub max_brief_rounds: u32,
    /// Follow-ups shorter than this may skip the safety model call.
    #[serde(default = "default_short_followup_chars")]
    pub short_followup_chars: usize,
    /// Messages of history passed to the chat model.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: default_stage_timeout_secs(),
            max_brief_rounds: default_max_brief_rounds(),
            short_followup_chars: default_short_followup_chars(),
            history_window: default_history_window(),
        }
    }
}

fn default_stage_timeout_secs() -> u64 {
    90
}
fn default_max_brief_rounds() -> u32 {
    3
}
fn default_short_followup_chars() -> usize {
    30
}
fn default_history_window() -> usize {
    20
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

/// Lawyer and action-template listings for `find_lawyer` and
/// `get_action_template`. Unset means an empty directory.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DirectoryConfig {
    pub path: Option<PathBuf>,
}

fn default_bind() -> String {
    "127.0.0.1:7331".to_string()
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a config from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let c = &config.chunking;
    if c.parent_tokens == 0 || c.child_tokens == 0 {
        anyhow::bail!("chunking.parent_tokens and chunking.child_tokens must be > 0");
    }
    if c.child_tokens > c.parent_tokens {
        anyhow::bail!("chunking.child_tokens must not exceed chunking.parent_tokens");
    }

    let r = &config.retrieval;
    if r.rrf_k <= 0.0 {
        anyhow::bail!("retrieval.rrf_k must be > 0");
    }
    if r.final_limit < 1 || r.candidate_limit < 1 || r.rerank_top_n < 1 {
        anyhow::bail!("retrieval limits must be >= 1");
    }
    if r.min_rrf_score < 0.0 {
        anyhow::bail!("retrieval.min_rrf_score must be >= 0");
    }

    let e = &config.embedding;
    match e.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if e.is_enabled() && e.provider != "local" {
        if e.dims.is_none() || e.dims == Some(0) {
            anyhow::bail!("embedding.dims must be > 0 when provider is '{}'", e.provider);
        }
        if e.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                e.provider
            );
        }
    }
    if e.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.model.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown model provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    match config.reranker.provider.as_str() {
        "disabled" | "cohere" => {}
        other => anyhow::bail!(
            "Unknown reranker provider: '{}'. Must be disabled or cohere.",
            other
        ),
    }

    if config.orchestrator.max_brief_rounds == 0 {
        anyhow::bail!("orchestrator.max_brief_rounds must be >= 1");
    }

    Ok(())
}
