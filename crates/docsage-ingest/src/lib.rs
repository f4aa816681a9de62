//! DocSage Ingest: document sources, chunking, table and entity extraction,
//! and the ingestion pipeline that feeds a session index.

pub mod chunking;
pub mod extract;
pub mod ingest;
pub mod source;

pub use chunking::{reconstruct, Chunker, TextChunk};
pub use extract::entities::{EntityKind, ExtractedEntity};
pub use extract::structure::{
    analyze_structure, ContentQuality, DocumentStructure, DocumentType, Section, SectionKind,
    StructureElement,
};
pub use extract::tables::{Confidence, Table, TableExtractor, TableLayout};
pub use extract::{extract_all, Extraction};
pub use ingest::{content_hash, IngestReport, Ingester};
pub use source::{Document, DocumentSource, ExtractedText, FileDocumentSource, FileType, PageText};
