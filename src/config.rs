use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub blob: BlobConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_index: VectorIndexConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub summarize: SummarizeConfig,
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlobConfig {
    /// Root directory for source files and generated media.
    pub root: PathBuf,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/blobs"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_window_words")]
    pub window_words: usize,
    #[serde(default = "default_overlap_words")]
    pub overlap_words: usize,
    /// Upper bound on chunk text stored as index metadata.
    #[serde(default = "default_metadata_text_cap")]
    pub metadata_text_cap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_words: default_window_words(),
            overlap_words: default_overlap_words(),
            metadata_text_cap: default_metadata_text_cap(),
        }
    }
}

fn default_window_words() -> usize {
    300
}
fn default_overlap_words() -> usize {
    20
}
fn default_metadata_text_cap() -> usize {
    2_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_openai_base")]
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_embed_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            base_url: default_openai_base(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_embed_batch_size() -> usize {
    10
}
fn default_batch_delay_ms() -> u64 {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_openai_base() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorIndexConfig {
    /// Backend: `sqlite` (local, cosine in-process) or `http` (remote provider).
    #[serde(default = "default_index_backend")]
    pub backend: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub index_name: Option<String>,
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
    #[serde(default = "default_fetch_batch_size")]
    pub fetch_batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
            base_url: None,
            index_name: None,
            upsert_batch_size: default_upsert_batch_size(),
            fetch_batch_size: default_fetch_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

fn default_index_backend() -> String {
    "sqlite".to_string()
}
fn default_upsert_batch_size() -> usize {
    50
}
fn default_fetch_batch_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Fast default model, also the fallback target.
    #[serde(default = "default_chat_model")]
    pub default_model: String,
    /// Higher-latency reasoning model for "think" requests.
    #[serde(default = "default_think_model")]
    pub think_model: String,
    /// Model variant permitted to call the live web-search tool.
    #[serde(default = "default_search_model")]
    pub web_search_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_openai_base")]
    pub base_url: String,
    /// Flush cadence for streaming persistence, in milliseconds.
    #[serde(default = "default_flush_ms")]
    pub stream_flush_ms: u64,
    /// Slice size when replaying a batch answer incrementally.
    #[serde(default = "default_replay_slice_chars")]
    pub replay_slice_chars: usize,
    #[serde(default = "default_replay_delay_ms")]
    pub replay_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_model: default_chat_model(),
            think_model: default_think_model(),
            web_search_model: default_search_model(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            base_url: default_openai_base(),
            stream_flush_ms: default_flush_ms(),
            replay_slice_chars: default_replay_slice_chars(),
            replay_delay_ms: default_replay_delay_ms(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_think_model() -> String {
    "o3-mini".to_string()
}
fn default_search_model() -> String {
    "gpt-4o-search-preview".to_string()
}
fn default_temperature() -> f32 {
    0.4
}
fn default_flush_ms() -> u64 {
    250
}
fn default_replay_slice_chars() -> usize {
    400
}
fn default_replay_delay_ms() -> u64 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_per_doc_limit")]
    pub per_doc_limit: usize,
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
    #[serde(default = "default_context_budget_chars")]
    pub context_budget_chars: usize,
    #[serde(default = "default_block_cap_chars")]
    pub block_cap_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            per_doc_limit: default_per_doc_limit(),
            max_documents: default_max_documents(),
            context_budget_chars: default_context_budget_chars(),
            block_cap_chars: default_block_cap_chars(),
        }
    }
}

fn default_per_doc_limit() -> usize {
    5
}
fn default_max_documents() -> usize {
    8
}
fn default_context_budget_chars() -> usize {
    12_000
}
fn default_block_cap_chars() -> usize {
    1_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Hard cap on extracted text length.
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
    /// Below this the run fails with "no meaningful text".
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
    /// Persist progress every N chunks.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,
    /// Cooperative delay between chunk iterations.
    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,
    /// Cap on the raw-text copy persisted at completion.
    #[serde(default = "default_content_copy_cap")]
    pub content_copy_cap: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_text_chars: default_max_text_chars(),
            min_text_chars: default_min_text_chars(),
            progress_interval: default_progress_interval(),
            chunk_delay_ms: default_chunk_delay_ms(),
            content_copy_cap: default_content_copy_cap(),
        }
    }
}

fn default_max_text_chars() -> usize {
    2_500_000
}
fn default_min_text_chars() -> usize {
    50
}
fn default_progress_interval() -> usize {
    25
}
fn default_chunk_delay_ms() -> u64 {
    25
}
fn default_content_copy_cap() -> usize {
    100_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummarizeConfig {
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
    #[serde(default = "default_part_chars")]
    pub part_chars: usize,
    #[serde(default = "default_max_parts")]
    pub max_parts: usize,
    #[serde(default = "default_summary_words")]
    pub default_length_words: usize,
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            max_chunks: default_max_chunks(),
            part_chars: default_part_chars(),
            max_parts: default_max_parts(),
            default_length_words: default_summary_words(),
        }
    }
}

fn default_max_chunks() -> usize {
    200
}
fn default_part_chars() -> usize {
    6_000
}
fn default_max_parts() -> usize {
    12
}
fn default_summary_words() -> usize {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct TopicsConfig {
    #[serde(default = "default_topic_threshold")]
    pub threshold: f32,
    #[serde(default = "default_max_labels")]
    pub max_labels: usize,
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            threshold: default_topic_threshold(),
            max_labels: default_max_labels(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

fn default_topic_threshold() -> f32 {
    0.25
}
fn default_max_labels() -> usize {
    3
}
fn default_excerpt_chars() -> usize {
    2_000
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
    "127.0.0.1:7410".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.window_words == 0 {
        anyhow::bail!("chunking.window_words must be > 0");
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.retrieval.context_budget_chars == 0 {
        anyhow::bail!("retrieval.context_budget_chars must be > 0");
    }
    if config.ingest.min_text_chars >= config.ingest.max_text_chars {
        anyhow::bail!("ingest.min_text_chars must be below ingest.max_text_chars");
    }
    match config.vector_index.backend.as_str() {
        "sqlite" => {}
        "http" => {
            if config.vector_index.base_url.is_none() {
                anyhow::bail!("vector_index.base_url required for the http backend");
            }
            if config.vector_index.index_name.is_none() {
                anyhow::bail!("vector_index.index_name required for the http backend");
            }
        }
        other => anyhow::bail!(
            "Unknown vector_index.backend: '{}'. Must be sqlite or http.",
            other
        ),
    }
    if !(0.0..=1.0).contains(&config.topics.threshold) {
        anyhow::bail!("topics.threshold must be in [0.0, 1.0]");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        toml::from_str("[db]\npath = \"/tmp/studystack.sqlite\"\n").unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = minimal();
        validate(&cfg).unwrap();
        assert_eq!(cfg.chunking.window_words, 300);
        assert_eq!(cfg.chunking.overlap_words, 20);
        assert_eq!(cfg.embedding.batch_size, 10);
        assert_eq!(cfg.vector_index.upsert_batch_size, 50);
        assert_eq!(cfg.ingest.max_text_chars, 2_500_000);
        assert_eq!(cfg.retrieval.context_budget_chars, 12_000);
    }

    #[test]
    fn http_backend_requires_endpoint() {
        let mut cfg = minimal();
        cfg.vector_index.backend = "http".to_string();
        assert!(validate(&cfg).is_err());
        cfg.vector_index.base_url = Some("https://index.example.com".to_string());
        cfg.vector_index.index_name = Some("studystack".to_string());
        validate(&cfg).unwrap();
    }

    #[test]
    fn rejects_unknown_backend() {
        let mut cfg = minimal();
        cfg.vector_index.backend = "pinecone2".to_string();
        assert!(validate(&cfg).is_err());
    }
}
