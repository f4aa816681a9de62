//! Runtime request and outcome types.

use docsage_analyze::{AnalysisIntent, CrossDocumentReport};
use docsage_retrieve::{RetrievalMode, RetrievalResult};
use serde::{Deserialize, Serialize};

/// Engine verb, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    Ingest,
    Select,
    Query,
    Summarize,
    Combine,
    Condense,
    Analyze,
}

/// A question against a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub session_id: String,
    pub query: String,
    /// Restrict to these files. Empty means the session's selection.
    #[serde(default)]
    pub filenames: Vec<String>,
    /// Force (or forbid) comprehensive retrieval instead of classifying
    /// the query.
    #[serde(default)]
    pub comprehensive: Option<bool>,
    #[serde(default)]
    pub k: Option<usize>,
}

impl QueryRequest {
    pub fn new(session_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            query: query.into(),
            filenames: Vec::new(),
            comprehensive: None,
            k: None,
        }
    }

    pub fn with_filenames(mut self, filenames: Vec<String>) -> Self {
        self.filenames = filenames;
        self
    }

    pub fn comprehensive(mut self, flag: bool) -> Self {
        self.comprehensive = Some(flag);
        self
    }
}

/// Where part of an answer came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub filename: String,
    pub chunk_id: String,
    pub page: Option<u32>,
    pub section: Option<String>,
    pub score: Option<f32>,
}

impl From<&RetrievalResult> for SourceRef {
    fn from(result: &RetrievalResult) -> Self {
        Self {
            filename: result.filename.clone(),
            chunk_id: result.chunk_id.clone(),
            page: result.page,
            section: result.section.clone(),
            score: result.score,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    /// `None` when nothing was retrieved and generation was skipped.
    pub text: Option<String>,
    pub intent: AnalysisIntent,
    pub mode_used: RetrievalMode,
    pub fell_back: bool,
    pub sources: Vec<SourceRef>,
    pub context_chars: usize,
    pub truncated: bool,
}

/// Result of merging per-file summaries.
#[derive(Debug, Clone, Serialize)]
pub struct CombinedSummary {
    pub name: String,
    pub text: String,
    /// Files whose summaries went into the result, in request order.
    pub files: Vec<String>,
    /// Files summarised on the fly because nothing was saved for them.
    pub generated: Vec<String>,
    /// Files that could not be summarised and were left out.
    pub failed: Vec<String>,
}

/// Cross-document analysis either runs or reports why it could not.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Ready {
        report: CrossDocumentReport,
        narrative: Option<String>,
    },
    /// The index could not be trusted or does not exist.
    Unavailable { reason: String },
}

impl AnalysisOutcome {
    pub fn report(&self) -> Option<&CrossDocumentReport> {
        match self {
            Self::Ready { report, .. } => Some(report),
            Self::Unavailable { .. } => None,
        }
    }
}
