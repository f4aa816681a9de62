//! Configuration and data directory management.
//!
//! Every section carries serde defaults so a partial JSON file (or none at
//! all) yields a usable engine. `DOCSAGE_*` environment variables override
//! whatever the file says.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Paths to all DocSage data directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// Per-session index storage (`data/sessions/`).
    pub sessions: PathBuf,
    /// Saved per-file and combined summaries (`data/summaries/`).
    pub summaries: PathBuf,
    /// Local embedding models (`data/models/`).
    pub models: PathBuf,
    /// Engine configuration (`data/docsage.json`).
    pub config_file: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            sessions: root.join("sessions"),
            summaries: root.join("summaries"),
            models: root.join("models"),
            config_file: root.join("docsage.json"),
            root,
        };
        std::fs::create_dir_all(&paths.sessions)?;
        std::fs::create_dir_all(&paths.summaries)?;
        std::fs::create_dir_all(&paths.models)?;
        Ok(paths)
    }
}

/// Similarity metric used by a vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Inner product over L2-normalized vectors (cosine). Higher is closer.
    #[default]
    InnerProduct,
    /// Squared Euclidean distance over raw vectors. Lower is closer.
    L2,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::InnerProduct => "inner_product",
            Metric::L2 => "l2",
        }
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "inner_product" | "ip" | "cosine" => Ok(Metric::InnerProduct),
            "l2" | "euclidean" => Ok(Metric::L2),
            other => Err(Error::Config(format!("unknown metric: {other}"))),
        }
    }
}

/// Chunk sizing, measured in characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Upper bound on a chunk's content, overlap included.
    pub chunk_size: usize,
    /// Characters repeated from the previous chunk.
    pub chunk_overlap: usize,
    /// A boundary closer than this to the chunk start is ignored in favour of
    /// a later one (or a hard split).
    pub min_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256,
            chunk_overlap: 50,
            min_chunk_size: 64,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            min_chunk_size: chunk_size / 4,
        }
    }

    /// Overlap as a fraction of the chunk size.
    pub fn overlap_fraction(&self) -> f32 {
        if self.chunk_size == 0 {
            return 0.0;
        }
        self.chunk_overlap as f32 / self.chunk_size as f32
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.min_chunk_size > self.chunk_size {
            return Err(Error::Config(format!(
                "min_chunk_size ({}) exceeds chunk_size ({})",
                self.min_chunk_size, self.chunk_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub metric: Metric,
    /// Dimension of every new session index. The engine overrides it with
    /// the embedder's own dimension.
    pub dimension: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            metric: Metric::InnerProduct,
            dimension: 384,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// k for targeted queries.
    pub top_k: usize,
    /// k used when exhaustive retrieval falls back to similarity search.
    pub exhaustive_fallback_k: usize,
    /// Drop top-k hits scoring below this (inner product only).
    pub min_score: Option<f32>,
    /// Candidates fetched for reranking; `None` disables reranking.
    pub rerank_pool: Option<usize>,
    pub query_cache_size: usize,
    pub query_cache_ttl_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            exhaustive_fallback_k: 150,
            min_score: None,
            rerank_pool: None,
            query_cache_size: 100,
            query_cache_ttl_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Cell delimiters tried in order.
    pub delimiters: Vec<char>,
    /// Max drift, in characters, between column starts of aligned lines.
    pub alignment_tolerance: usize,
    /// Max difference between a row's cell count and the header's.
    pub column_tolerance: usize,
    /// Aligned lines shorter than this (trimmed) never start a table.
    pub min_aligned_line_len: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            delimiters: vec!['|', '\t'],
            alignment_tolerance: 2,
            column_tolerance: 1,
            min_aligned_line_len: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Chunk pairs at or above this cosine similarity are near-duplicates.
    pub similarity_threshold: f32,
    /// Stemmed terms shorter than this are not significant.
    pub min_term_length: usize,
    /// Significant terms kept per chunk.
    pub max_terms_per_chunk: usize,
    pub max_themes: usize,
    /// Chunks compared pairwise by embedding; larger inputs are sampled.
    pub max_similarity_chunks: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.75,
            min_term_length: 4,
            max_terms_per_chunk: 12,
            max_themes: 10,
            max_similarity_chunks: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Context budget forwarded to the generation collaborator.
    pub max_context_chars: usize,
    pub max_entities_per_kind: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_chars: 12_000,
            max_entities_per_kind: 10,
        }
    }
}

/// Exponential backoff for retryable generation failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            backoff_factor: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt as i32);
        let ms = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub summary_max_tokens: usize,
    pub combine_max_tokens: usize,
    pub condense_max_tokens: usize,
    pub answer_max_tokens: usize,
    /// Per-file summaries generated concurrently during a combine.
    pub max_concurrent: usize,
    pub retry: RetryPolicy,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "mistral".into(),
            timeout_secs: 120,
            temperature: 0.5,
            summary_max_tokens: 700,
            combine_max_tokens: 1_000,
            condense_max_tokens: 300,
            answer_max_tokens: 256,
            max_concurrent: 3,
            retry: RetryPolicy::default(),
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Top-level DocSage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub chunking: ChunkingConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalConfig,
    pub extraction: ExtractionConfig,
    pub analysis: AnalysisConfig,
    pub context: ContextConfig,
    pub generation: GenerationConfig,
}

impl EngineConfig {
    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a JSON file (defaults when it does not exist), then apply
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str::<EngineConfig>(&raw)?
        } else {
            debug!("No config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env()?;
        config.chunking.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Saved engine config to {}", path.display());
        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_parse("DOCSAGE_CHUNK_SIZE")? {
            self.chunking.chunk_size = v;
        }
        if let Some(v) = env_parse("DOCSAGE_CHUNK_OVERLAP")? {
            self.chunking.chunk_overlap = v;
        }
        if let Some(v) = env_parse("DOCSAGE_EMBEDDING_DIM")? {
            self.index.dimension = v;
        }
        if let Some(v) = env_parse::<Metric>("DOCSAGE_METRIC")? {
            self.index.metric = v;
        }
        if let Some(v) = env_parse("DOCSAGE_TOP_K")? {
            self.retrieval.top_k = v;
        }
        if let Some(v) = env_parse("DOCSAGE_MAX_RETRIEVAL_RESULTS")? {
            self.retrieval.exhaustive_fallback_k = v;
        }
        if let Some(v) = env_parse("DOCSAGE_RERANK_POOL")? {
            self.retrieval.rerank_pool = Some(v);
        }
        if let Some(v) = env_parse("DOCSAGE_QUERY_CACHE_MAX_SIZE")? {
            self.retrieval.query_cache_size = v;
        }
        if let Some(v) = env_parse("DOCSAGE_QUERY_CACHE_TTL_SECONDS")? {
            self.retrieval.query_cache_ttl_secs = v;
        }
        if let Some(v) = env_parse("DOCSAGE_ALIGNMENT_TOLERANCE")? {
            self.extraction.alignment_tolerance = v;
        }
        if let Some(v) = env_parse("DOCSAGE_MAX_CONTEXT_CHARS")? {
            self.context.max_context_chars = v;
        }
        if let Some(v) = env_string("DOCSAGE_OLLAMA_BASE_URL").or_else(|| env_string("OLLAMA_BASE_URL")) {
            self.generation.base_url = v;
        }
        if let Some(v) = env_string("DOCSAGE_OLLAMA_MODEL").or_else(|| env_string("OLLAMA_MODEL_NAME")) {
            self.generation.model = v;
        }
        if let Some(v) = env_parse("DOCSAGE_GENERATION_TIMEOUT_SECS")? {
            self.generation.timeout_secs = v;
        }
        if let Some(v) = env_parse("DOCSAGE_MAX_CONCURRENT_FILE_TASKS")? {
            self.generation.max_concurrent = v;
        }
        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{key}={raw}: {e}"))),
        None => Ok(None),
    }
}
