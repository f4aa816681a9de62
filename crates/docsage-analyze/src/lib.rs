//! DocSage Analyze: cross-document themes and relationships, and assembly
//! of retrieval results into a budget-limited generation context.

pub mod aggregate;
pub mod crossdoc;

pub use aggregate::{AnalysisIntent, AssembledContext, ContextItem, SummaryAggregator};
pub use crossdoc::{
    AnalysisChunk, CrossDocumentAnalyzer, CrossDocumentInsight, CrossDocumentReport,
    DocumentRelationship, ThemeSource,
};
