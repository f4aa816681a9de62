//! DocSage runtime: the engine that ties sessions, ingestion, retrieval,
//! cross-document analysis and generation together.
//!
//! Indexing and retrieval are synchronous and CPU-bound. Anything that
//! reaches the generation collaborator is async, bounded by a timeout and
//! retried on transient failure.

pub mod engine;
pub mod summaries;
pub mod types;

pub use engine::Engine;
pub use summaries::{SavedSummary, SummaryKind, SummaryMetadata, SummaryStore};
pub use types::*;
