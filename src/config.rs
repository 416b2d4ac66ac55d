//! TOML configuration.
//!
//! Every section has defaults, so an empty file (or [`Config::minimal`]) is a
//! valid keyword-only setup: local SQLite, no embeddings, no vector backend,
//! watcher pointed at Cursor's default storage location.
//!
//! ```toml
//! [db]
//! path = "./data/cursor-docs.sqlite"
//!
//! [rate_limit]
//! requests_per_second = 2
//! burst = 5
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! urls = ["http://localhost:11434", "http://127.0.0.1:11435"]
//!
//! [vector]
//! backend = "local"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cursor-docs")
        .join("docs.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScraperConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Default page budget for `add` when the caller does not pass one.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default)]
    pub follow_links: bool,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_fetch_timeout(),
            max_redirects: default_max_redirects(),
            max_pages: default_max_pages(),
            follow_links: false,
        }
    }
}

fn default_user_agent() -> String {
    format!(
        "cursor-docs/{} (local documentation indexer)",
        env!("CARGO_PKG_VERSION")
    )
}
fn default_fetch_timeout() -> u64 {
    30
}
fn default_max_redirects() -> usize {
    5
}
fn default_max_pages() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_rps")]
    pub requests_per_second: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rps(),
            burst: default_burst(),
        }
    }
}

fn default_rps() -> u32 {
    2
}
fn default_burst() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1500
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,
    #[serde(default = "default_branch_timeout")]
    pub branch_timeout_secs: u64,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Candidates fetched per branch before fusion.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            keyword_weight: default_keyword_weight(),
            branch_timeout_secs: default_branch_timeout(),
            default_limit: default_limit(),
            candidate_k: default_candidate_k(),
        }
    }
}

fn default_semantic_weight() -> f64 {
    0.7
}
fn default_keyword_weight() -> f64 {
    0.3
}
fn default_branch_timeout() -> u64 {
    30
}
fn default_limit() -> usize {
    10
}
fn default_candidate_k() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Service endpoints tried in order (primary first, then fallbacks).
    #[serde(default = "default_embedding_urls")]
    pub urls: Vec<String>,
    /// Texts longer than this many characters are truncated before sending.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            urls: default_embedding_urls(),
            max_chars: default_max_chars(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_embedding_urls() -> Vec<String> {
    vec!["http://localhost:11434".to_string()]
}
fn default_max_chars() -> usize {
    8000
}
fn default_embedding_timeout() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    /// `none`, `local` (SQLite table), or `surrealdb` (remote HTTP).
    #[serde(default = "default_vector_backend")]
    pub backend: String,
    #[serde(default = "default_vector_url")]
    pub url: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_vector_timeout")]
    pub timeout_secs: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
            url: default_vector_url(),
            namespace: default_namespace(),
            database: default_database(),
            username: None,
            password: None,
            timeout_secs: default_vector_timeout(),
        }
    }
}

fn default_vector_backend() -> String {
    "none".to_string()
}
fn default_vector_url() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_namespace() -> String {
    "cursor_docs".to_string()
}
fn default_database() -> String {
    "docs".to_string()
}
fn default_vector_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// How long a backend capability probe stays valid before re-checking.
    #[serde(default = "default_probe_ttl")]
    pub probe_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            probe_ttl_secs: default_probe_ttl(),
        }
    }
}

fn default_probe_ttl() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cursor's global key-value database.
    #[serde(default = "default_global_db")]
    pub global_db: PathBuf,
    /// Directory holding one `<hash>/state.vscdb` per workspace.
    #[serde(default = "default_workspace_storage")]
    pub workspace_storage: PathBuf,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            global_db: default_global_db(),
            workspace_storage: default_workspace_storage(),
            debounce_ms: default_debounce_ms(),
            initial_delay_secs: default_initial_delay(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn cursor_user_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Cursor")
        .join("User")
}

fn default_global_db() -> PathBuf {
    cursor_user_dir().join("globalStorage").join("state.vscdb")
}
fn default_workspace_storage() -> PathBuf {
    cursor_user_dir().join("workspaceStorage")
}
fn default_debounce_ms() -> u64 {
    2000
}
fn default_initial_delay() -> u64 {
    5
}
fn default_poll_interval() -> u64 {
    300
}

impl Config {
    /// All-defaults configuration, used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be smaller than chunking.chunk_size");
    }

    if config.rate_limit.requests_per_second == 0 || config.rate_limit.burst == 0 {
        anyhow::bail!("rate_limit.requests_per_second and rate_limit.burst must be >= 1");
    }

    if config.scraper.max_pages == 0 {
        anyhow::bail!("scraper.max_pages must be >= 1");
    }

    for (name, weight) in [
        ("semantic_weight", config.retrieval.semantic_weight),
        ("keyword_weight", config.retrieval.keyword_weight),
    ] {
        if !(0.0..=1.0).contains(&weight) {
            anyhow::bail!("retrieval.{} must be in [0.0, 1.0]", name);
        }
    }
    if config.retrieval.default_limit == 0 {
        anyhow::bail!("retrieval.default_limit must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.urls.is_empty() {
        anyhow::bail!("embedding.urls must list at least one endpoint");
    }

    match config.vector.backend.as_str() {
        "none" | "local" | "surrealdb" => {}
        other => anyhow::bail!(
            "Unknown vector backend: '{}'. Must be none, local, or surrealdb.",
            other
        ),
    }

    Ok(())
}
