//! Data types for indexed chunks, search hits and index statistics.

use docsage_core::Metric;
use serde::{Deserialize, Serialize};

/// Current version of the per-entry metadata record.
pub const METADATA_VERSION: u32 = 1;

fn metadata_version() -> u32 {
    METADATA_VERSION
}

/// Metadata stored alongside each vector, in the same position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default = "metadata_version")]
    pub version: u32,
    /// Unique within the owning session.
    pub chunk_id: String,
    pub document_id: String,
    pub filename: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Monotonic per document.
    pub chunk_index: usize,
    /// Character offset of `content` within the document.
    #[serde(default)]
    pub char_start: usize,
    #[serde(default)]
    pub char_end: usize,
    /// Leading characters of `content` repeated from the previous chunk.
    #[serde(default)]
    pub overlap: usize,
    #[serde(default)]
    pub ocr_required: bool,
    /// Heading of the document section the chunk starts in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl ChunkMetadata {
    pub fn new(
        chunk_id: impl Into<String>,
        document_id: impl Into<String>,
        filename: impl Into<String>,
        content: impl Into<String>,
        chunk_index: usize,
    ) -> Self {
        let content = content.into();
        let len = content.chars().count();
        Self {
            version: METADATA_VERSION,
            chunk_id: chunk_id.into(),
            document_id: document_id.into(),
            filename: filename.into(),
            content,
            page: None,
            chunk_index,
            char_start: 0,
            char_end: len,
            overlap: 0,
            ocr_required: false,
            section: None,
        }
    }
}

/// One nearest-neighbour candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Insertion position within the index.
    pub position: usize,
    /// Similarity in [-1, 1] for inner product, squared distance for L2.
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// Index-level statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub vector_count: usize,
    pub metadata_count: usize,
    pub dimension: Option<usize>,
    pub metric: Metric,
    pub document_count: usize,
}
