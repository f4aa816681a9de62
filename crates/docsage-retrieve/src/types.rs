//! Retrieval request and result types.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Nearest neighbours of the query embedding.
    TopK,
    /// Every chunk of the selected files, in insertion order.
    Exhaustive,
}

/// What to retrieve from a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub query: String,
    pub mode: RetrievalMode,
    /// Overrides the configured `top_k`.
    #[serde(default)]
    pub k: Option<usize>,
    /// Exact filenames to keep. Empty keeps every file.
    #[serde(default)]
    pub filenames: Vec<String>,
}

impl RetrievalRequest {
    pub fn top_k(query: impl Into<String>, filenames: Vec<String>) -> Self {
        Self {
            query: query.into(),
            mode: RetrievalMode::TopK,
            k: None,
            filenames,
        }
    }

    pub fn exhaustive(query: impl Into<String>, filenames: Vec<String>) -> Self {
        Self {
            query: query.into(),
            mode: RetrievalMode::Exhaustive,
            k: None,
            filenames,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }
}

/// One retrieved chunk. Created per query and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    /// 1-based.
    pub rank: usize,
    /// Similarity in [0, 1] for inner product, squared distance for L2.
    /// `None` for exhaustive results, which are not scored.
    pub score: Option<f32>,
    pub filename: String,
    pub document_id: String,
    pub content: String,
    pub page: Option<u32>,
    pub chunk_index: usize,
    /// Insertion position in the session index.
    pub position: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Set when a reranker reordered the candidates; ranks then follow it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

/// Results plus the mode that actually produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Retrieval {
    pub requested: RetrievalMode,
    pub used: RetrievalMode,
    pub results: Vec<RetrievalResult>,
}

impl Retrieval {
    pub fn fell_back(&self) -> bool {
        self.requested != self.used
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Distinct filenames among the results.
    pub fn filenames(&self) -> BTreeSet<&str> {
        self.results.iter().map(|r| r.filename.as_str()).collect()
    }
}
