//! Ingestion pipeline: document → chunks → embeddings → session index.

use std::sync::Arc;

use docsage_core::{EngineConfig, Error, ExtractionConfig, Result};
use docsage_infer::EmbedderBackend;
use docsage_store::{ChunkMetadata, Session};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::chunking::{Chunker, TextChunk};
use crate::extract::structure::{analyze_structure, DocumentStructure};
use crate::extract::tables::TableExtractor;
use crate::source::Document;

/// Texts sent to the embedder per call.
const EMBED_BATCH_SIZE: usize = 32;

/// SHA-256 of the text, hex encoded.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Outcome of ingesting one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub document_id: String,
    pub filename: String,
    pub content_hash: String,
    pub chunks_total: usize,
    pub chunks_indexed: usize,
    /// Chunks the embedder could not represent.
    pub chunks_skipped: usize,
    pub tables_detected: usize,
    pub ocr_required: bool,
    /// The session already held this document; nothing was added.
    pub already_indexed: bool,
    pub structure: DocumentStructure,
}

pub struct Ingester {
    chunker: Chunker,
    tables: TableExtractor,
    embedder: Arc<dyn EmbedderBackend>,
}

impl Ingester {
    pub fn new(config: &EngineConfig, embedder: Arc<dyn EmbedderBackend>) -> Result<Self> {
        Ok(Self {
            chunker: Chunker::new(config.chunking.clone())?,
            tables: TableExtractor::new(config.extraction.clone()),
            embedder,
        })
    }

    pub fn with_extraction(mut self, extraction: ExtractionConfig) -> Self {
        self.tables = TableExtractor::new(extraction);
        self
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Chunk, embed and append a document to the session index, then add its
    /// filename to the session selection. The append is a single atomic
    /// index write: either every indexed chunk lands or none does.
    pub fn ingest(&self, session: &Session, document: &Document) -> Result<IngestReport> {
        let text = document.full_text();
        let mut structure = analyze_structure(&text);
        structure.likely_scanned |= document.ocr_required;
        let mut report = IngestReport {
            document_id: document.id.clone(),
            filename: document.filename.clone(),
            content_hash: content_hash(&text),
            ocr_required: document.ocr_required,
            structure,
            ..IngestReport::default()
        };

        if session.index().contains_document(&document.id) {
            return Ok(already_indexed(session, document, report));
        }

        if document.is_blank() {
            warn!(
                "No text in {} (ocr_required={})",
                document.filename, document.ocr_required
            );
            return Ok(report);
        }

        let chunks = self.chunker.chunk_document(document);
        report.chunks_total = chunks.len();
        report.tables_detected = chunks
            .iter()
            .map(|c| self.tables.extract(&c.chunk_id, &c.content).len())
            .sum();

        let mut vectors = Vec::with_capacity(chunks.len());
        let mut metadata = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            for (chunk, embedding) in batch.iter().zip(self.embed_batch(batch)?) {
                match embedding {
                    Some(vector) => {
                        vectors.push(vector);
                        metadata.push(chunk_metadata(chunk, document.ocr_required, &report.structure));
                    }
                    None => report.chunks_skipped += 1,
                }
            }
        }

        if !vectors.is_empty() {
            match session.index().add_if_absent(&document.id, &vectors, metadata)? {
                Some(added) => report.chunks_indexed = added,
                None => return Ok(already_indexed(session, document, report)),
            }
        }
        session.include(&document.filename);

        info!(
            "Ingested {} into session {}: {}/{} chunks, {} tables, {} sections ({:?})",
            document.filename,
            session.id(),
            report.chunks_indexed,
            report.chunks_total,
            report.tables_detected,
            report.structure.sections.len(),
            report.structure.document_type
        );
        Ok(report)
    }

    /// Embed a batch; if the batch call fails, retry chunk by chunk so one
    /// unembeddable chunk does not sink its neighbours.
    fn embed_batch(&self, batch: &[TextChunk]) -> Result<Vec<Option<Array1<f32>>>> {
        let texts: Vec<&str> = batch.iter().map(|c| c.content.as_str()).collect();
        match self.embedder.embed_batch(&texts) {
            Ok(vectors) => return Ok(vectors.into_iter().map(Some).collect()),
            Err(e) => debug!("Batch embedding failed, falling back per chunk: {}", e),
        }

        batch
            .iter()
            .map(|chunk| match self.embedder.embed(&chunk.content) {
                Ok(result) => Ok(Some(result.embedding)),
                Err(Error::MalformedInput(reason)) => {
                    warn!("Skipping chunk {}: {}", chunk.chunk_id, reason);
                    Ok(None)
                }
                Err(e) => Err(e),
            })
            .collect()
    }
}

fn already_indexed(session: &Session, document: &Document, mut report: IngestReport) -> IngestReport {
    debug!("Document {} already in session {}", document.id, session.id());
    report.already_indexed = true;
    report.chunks_skipped = 0;
    session.include(&document.filename);
    report
}

fn chunk_metadata(chunk: &TextChunk, ocr_required: bool, structure: &DocumentStructure) -> ChunkMetadata {
    let mut meta = ChunkMetadata::new(
        chunk.chunk_id.clone(),
        chunk.document_id.clone(),
        chunk.filename.clone(),
        chunk.content.clone(),
        chunk.chunk_index,
    );
    meta.page = chunk.page;
    meta.char_start = chunk.char_start;
    meta.char_end = chunk.char_end;
    meta.overlap = chunk.overlap;
    meta.ocr_required = ocr_required;
    meta.section = structure
        .section_at(chunk.char_start + chunk.overlap)
        .map(|s| s.heading.clone());
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsage_core::{ChunkingConfig, Metric};
    use docsage_infer::HashingEmbedder;
    use tempfile::TempDir;

    fn ingester() -> Ingester {
        let config = EngineConfig {
            chunking: ChunkingConfig::new(120, 20),
            ..EngineConfig::default()
        };
        Ingester::new(&config, Arc::new(HashingEmbedder::new(64))).unwrap()
    }

    fn test_session() -> (Session, TempDir) {
        let dir = TempDir::new().unwrap();
        let session = Session::empty("s1", dir.path().join("s1"), Metric::InnerProduct);
        (session, dir)
    }

    fn report_text() -> String {
        "The annual report covers revenue growth across all regions. ".repeat(12)
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("").len(), 64);
    }

    #[test]
    fn test_ingest_indexes_every_chunk() {
        let (session, _dir) = test_session();
        let doc = Document::from_text("d1", "report.txt", report_text());
        let report = ingester().ingest(&session, &doc).unwrap();

        assert!(report.chunks_total > 1);
        assert_eq!(report.chunks_indexed, report.chunks_total);
        assert_eq!(report.chunks_skipped, 0);
        let stats = session.index().stats();
        assert_eq!(stats.vector_count, report.chunks_total);
        assert_eq!(stats.vector_count, stats.metadata_count);
        assert_eq!(session.selected_filenames(), vec!["report.txt"]);
    }

    #[test]
    fn test_unembeddable_chunks_are_skipped() {
        let (session, _dir) = test_session();
        let text = format!("{}\n\n{}", "-".repeat(110), report_text());
        let doc = Document::from_text("d2", "mixed.txt", text);
        let report = ingester().ingest(&session, &doc).unwrap();

        assert!(report.chunks_skipped >= 1);
        assert_eq!(report.chunks_indexed + report.chunks_skipped, report.chunks_total);
        assert_eq!(session.index().len(), report.chunks_indexed);
    }

    #[test]
    fn test_reingest_is_a_no_op() {
        let (session, _dir) = test_session();
        let doc = Document::from_text("d1", "report.txt", report_text());
        let ingester = ingester();
        let first = ingester.ingest(&session, &doc).unwrap();
        let second = ingester.ingest(&session, &doc).unwrap();

        assert!(second.already_indexed);
        assert_eq!(session.index().len(), first.chunks_indexed);
    }

    #[test]
    fn test_concurrent_ingest_of_same_document_indexes_once() {
        let (session, _dir) = test_session();
        let session = Arc::new(session);
        let ingester = Arc::new(ingester());
        let doc = Arc::new(Document::from_text("d1", "report.txt", report_text()));
        let barrier = Arc::new(std::sync::Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let (session, ingester, doc, barrier) =
                    (Arc::clone(&session), Arc::clone(&ingester), Arc::clone(&doc), Arc::clone(&barrier));
                std::thread::spawn(move || {
                    barrier.wait();
                    ingester.ingest(&session, &doc).unwrap()
                })
            })
            .collect();
        let reports: Vec<IngestReport> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(reports.iter().filter(|r| r.already_indexed).count(), 1);
        let ids: Vec<String> = session
            .index()
            .read(|idx| idx.metadata().iter().map(|m| m.chunk_id.clone()).collect());
        let unique: std::collections::HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
        assert_eq!(ids.len(), reports.iter().map(|r| r.chunks_indexed).sum::<usize>());
        assert!(!ids.is_empty());
    }

    #[test]
    fn test_chunks_carry_their_section() {
        let (session, _dir) = test_session();
        let text = format!(
            "1. Overview\n{}\n2. Budget\n{}",
            "The programme funds new clinics in rural districts. ".repeat(4),
            "The approved budget is USD 90,000 for the first year. ".repeat(4)
        );
        let doc = Document::from_text("d5", "plan.txt", text);
        let report = ingester().ingest(&session, &doc).unwrap();

        assert_eq!(report.structure.headings(), vec!["Overview", "Budget"]);
        let sections: Vec<Option<String>> = session
            .index()
            .read(|idx| idx.metadata().iter().map(|m| m.section.clone()).collect());
        assert_eq!(sections.first().unwrap().as_deref(), Some("Overview"));
        assert_eq!(sections.last().unwrap().as_deref(), Some("Budget"));
    }

    #[test]
    fn test_blank_scanned_document() {
        let (session, _dir) = test_session();
        let mut doc = Document::new("d3", "scan.pdf", Vec::new());
        doc.ocr_required = true;
        let report = ingester().ingest(&session, &doc).unwrap();

        assert!(report.ocr_required);
        assert!(report.structure.likely_scanned);
        assert_eq!(report.chunks_total, 0);
        assert!(session.index().is_empty());
    }

    #[test]
    fn test_tables_are_counted() {
        let (session, _dir) = test_session();
        let doc = Document::from_text("d4", "prices.txt", "Item | Price\nDesk | 120\nLamp | 30\n");
        let report = ingester().ingest(&session, &doc).unwrap();
        assert_eq!(report.tables_detected, 1);
    }

    #[test]
    fn test_dimension_mismatch_leaves_index_untouched() {
        let (session, _dir) = test_session();
        let doc = Document::from_text("d1", "report.txt", report_text());
        ingester().ingest(&session, &doc).unwrap();
        let before = session.index().len();

        let config = EngineConfig::default();
        let other = Ingester::new(&config, Arc::new(HashingEmbedder::new(32))).unwrap();
        let doc2 = Document::from_text("d2", "other.txt", report_text());
        let err = other.ingest(&session, &doc2).unwrap_err();

        assert!(matches!(err, Error::DimensionMismatch { .. }));
        assert_eq!(session.index().len(), before);
    }
}
