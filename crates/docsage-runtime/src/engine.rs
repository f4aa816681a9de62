//! The engine: owns the session registry and every pipeline stage, and
//! exposes the verbs callers use.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use docsage_analyze::{
    AnalysisChunk, AnalysisIntent, CrossDocumentAnalyzer, CrossDocumentReport, SummaryAggregator,
};
use docsage_core::{DataPaths, EngineConfig, Error, Result};
use docsage_generate::{generate_with_retry, prompts, GenerationRequest, Generator, OllamaGenerator};
use docsage_infer::{create_embedder, EmbedderBackend};
use docsage_ingest::{
    content_hash, Document, DocumentSource, FileDocumentSource, IngestReport, Ingester,
};
use docsage_retrieve::{LexicalReranker, Retrieval, RetrievalRequest, RetrievalResult, Retriever};
use docsage_store::{IndexManifest, Session, SessionRegistry};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::summaries::{SavedSummary, SummaryKind, SummaryMetadata, SummaryStore};
use crate::types::*;

pub struct Engine {
    config: EngineConfig,
    paths: DataPaths,
    registry: SessionRegistry,
    ingester: Ingester,
    retriever: Retriever,
    analyzer: CrossDocumentAnalyzer,
    aggregator: SummaryAggregator,
    generator: Arc<dyn Generator>,
    source: Arc<dyn DocumentSource>,
    summaries: SummaryStore,
}

impl Engine {
    /// Open the data root: load `docsage.json` (defaults plus environment
    /// overrides), pick the best embedder and talk to Ollama for generation.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let paths = DataPaths::new(root)?;
        let config = EngineConfig::load(&paths.config_file)?;
        let embedder = create_embedder(&paths.models, &config);
        let generator = Arc::new(OllamaGenerator::new(&config.generation)?);
        Self::with_components(config, paths, embedder, generator)
    }

    pub fn with_components(
        mut config: EngineConfig,
        paths: DataPaths,
        embedder: Arc<dyn EmbedderBackend>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        if config.index.dimension != embedder.dimension() {
            warn!(
                "Configured dimension {} differs from embedder dimension {}; using the embedder's",
                config.index.dimension,
                embedder.dimension()
            );
            config.index.dimension = embedder.dimension();
        }
        let registry = SessionRegistry::new(&paths.sessions, config.index.clone())?;
        let ingester = Ingester::new(&config, Arc::clone(&embedder))?;
        let mut retriever = Retriever::new(embedder, config.retrieval.clone());
        if config.retrieval.rerank_pool.is_some() {
            retriever = retriever.with_reranker(Arc::new(LexicalReranker));
        }
        let analyzer = CrossDocumentAnalyzer::new(config.analysis.clone());
        let aggregator = SummaryAggregator::new(config.context.clone(), config.extraction.clone());
        let summaries = SummaryStore::new(paths.summaries.clone());

        info!(
            "Engine ready at {} (generator: {}, model: {})",
            paths.root.display(),
            generator.name(),
            config.generation.model
        );
        Ok(Self {
            config,
            paths,
            registry,
            ingester,
            retriever,
            analyzer,
            aggregator,
            generator,
            source: Arc::new(FileDocumentSource),
            summaries,
        })
    }

    /// Replace the source used by [`Engine::ingest_path`].
    pub fn with_source(mut self, source: Arc<dyn DocumentSource>) -> Self {
        self.source = source;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn summaries(&self) -> &SummaryStore {
        &self.summaries
    }

    // ----- ingestion and selection -----

    pub fn ingest_document(&self, session_id: &str, document: &Document) -> Result<IngestReport> {
        debug!("{:?} {} into session {}", Verb::Ingest, document.filename, session_id);
        let session = self.registry.get_or_create(session_id)?;
        self.ingester.ingest(&session, document)
    }

    /// Read a file through the document source and ingest it. The document
    /// id is derived from the filename and text, so re-ingesting an
    /// unchanged file is a no-op.
    pub fn ingest_path(&self, session_id: &str, path: &Path) -> Result<IngestReport> {
        let mut document = self.source.load("", path)?;
        document.id = document_id(&document);
        self.ingest_document(session_id, &document)
    }

    /// Replace the session's file selection.
    pub fn select(&self, session_id: &str, filenames: Vec<String>) -> Result<()> {
        debug!("{:?} {:?} in session {}", Verb::Select, filenames, session_id);
        self.registry.open(session_id)?.select(filenames);
        Ok(())
    }

    pub fn selected(&self, session_id: &str) -> Result<Vec<String>> {
        Ok(self.registry.open(session_id)?.selected_filenames())
    }

    /// Indexed filenames in ingestion order.
    pub fn documents(&self, session_id: &str) -> Result<Vec<String>> {
        let session = self.registry.open(session_id)?;
        Ok(session.index().read(|idx| {
            let mut files: Vec<String> = Vec::new();
            for meta in idx.metadata() {
                if !files.contains(&meta.filename) {
                    files.push(meta.filename.clone());
                }
            }
            files
        }))
    }

    // ----- retrieval and answers -----

    pub fn retrieve(&self, session_id: &str, request: &RetrievalRequest) -> Result<Retrieval> {
        self.retriever.retrieve(&self.registry, session_id, request)
    }

    /// Classify the question, retrieve accordingly, assemble a bounded
    /// context and ask the generator. Generation is skipped when nothing
    /// was retrieved.
    pub async fn query(&self, request: &QueryRequest) -> Result<Answer> {
        let session = self.open_session(&request.session_id)?;
        let intent = AnalysisIntent::classify(&request.query, request.comprehensive);
        let retrieval_request = RetrievalRequest {
            query: request.query.clone(),
            mode: intent.retrieval_mode(),
            k: request.k,
            filenames: scope(session.as_deref(), &request.filenames),
        };
        let retrieval = self
            .retriever
            .retrieve_in(session.as_ref().map(|s| s.index()), &retrieval_request)?;

        let mut answer = Answer {
            text: None,
            intent,
            mode_used: retrieval.used,
            fell_back: retrieval.fell_back(),
            sources: retrieval.results.iter().map(SourceRef::from).collect(),
            context_chars: 0,
            truncated: false,
        };
        if retrieval.is_empty() {
            info!("Nothing retrieved for query in session {}", request.session_id);
            return Ok(answer);
        }

        let context = self.aggregator.assemble(&request.query, intent, &retrieval.results);
        let prompt = prompts::answer(&request.query, &context.text, &self.config.generation);
        answer.text = Some(self.generate(&prompt).await?);
        answer.context_chars = context.text.chars().count();
        answer.truncated = context.truncated;
        info!(
            "{:?} answered from {} chunks ({:?})",
            Verb::Query,
            answer.sources.len(),
            answer.mode_used
        );
        Ok(answer)
    }

    // ----- summaries -----

    /// Summarise every chunk of one file and save the result, replacing any
    /// earlier summary of it.
    pub async fn summarize_file(&self, session_id: &str, filename: &str) -> Result<SavedSummary> {
        let session = self.open_session(session_id)?;
        let request = RetrievalRequest::exhaustive("", vec![filename.to_string()]);
        let retrieval = self
            .retriever
            .retrieve_in(session.as_ref().map(|s| s.index()), &request)?;
        if retrieval.is_empty() {
            return Err(Error::NotFound(format!("no indexed content for {filename}")));
        }

        let context =
            self.aggregator
                .assemble("", AnalysisIntent::ComprehensiveSummary, &retrieval.results);
        let text = self
            .generate(&prompts::summary(filename, &context.text, &self.config.generation))
            .await?;

        let mut metadata = SummaryMetadata::new(
            filename,
            SummaryKind::File,
            vec![filename.to_string()],
            &self.config.generation.model,
        );
        metadata.chunk_count = retrieval.results.len();
        metadata.table_count = context.tables_total;
        metadata.fell_back = retrieval.fell_back();
        debug!("{:?} {} from {} chunks", Verb::Summarize, filename, metadata.chunk_count);
        self.summaries.save(session_id, &text, metadata)
    }

    pub fn saved_summary(&self, session_id: &str, filename: &str) -> Result<Option<SavedSummary>> {
        self.summaries.load(session_id, filename)
    }

    pub fn list_summaries(&self, session_id: &str) -> Result<Vec<SummaryMetadata>> {
        self.summaries.list(session_id)
    }

    /// Merge per-file summaries into one attributed report. Saved summaries
    /// are reused; missing ones are generated concurrently (bounded by
    /// `max_concurrent`). Files that cannot be summarised are reported in
    /// `failed` and left out.
    pub async fn combine_summaries(
        &self,
        session_id: &str,
        filenames: &[String],
    ) -> Result<CombinedSummary> {
        let mut requested: Vec<String> = Vec::new();
        for f in filenames {
            if !requested.contains(f) {
                requested.push(f.clone());
            }
        }
        if requested.is_empty() {
            return Err(Error::MalformedInput("no files to combine".into()));
        }

        let mut texts: HashMap<String, String> = HashMap::new();
        let mut missing = Vec::new();
        for filename in &requested {
            match self.summaries.load(session_id, filename)? {
                Some(saved) => {
                    texts.insert(filename.clone(), saved.text);
                }
                None => missing.push(filename.clone()),
            }
        }

        let outcomes: Vec<(String, Result<SavedSummary>)> = stream::iter(missing)
            .map(|filename| async move {
                let outcome = self.summarize_file(session_id, &filename).await;
                (filename, outcome)
            })
            .buffer_unordered(self.config.generation.max_concurrent.max(1))
            .collect()
            .await;

        let mut generated = Vec::new();
        let mut failed = Vec::new();
        let mut last_error = None;
        for (filename, outcome) in outcomes {
            match outcome {
                Ok(saved) => {
                    texts.insert(filename.clone(), saved.text);
                    generated.push(filename);
                }
                Err(e) => {
                    warn!("Could not summarise {} for combining: {}", filename, e);
                    failed.push(filename);
                    last_error = Some(e);
                }
            }
        }
        let order = |f: &String| requested.iter().position(|r| r == f);
        generated.sort_by_key(order);
        failed.sort_by_key(order);

        let parts: Vec<(String, String)> = requested
            .iter()
            .filter_map(|f| texts.get(f).map(|t| (f.clone(), t.clone())))
            .collect();
        if parts.is_empty() {
            return Err(last_error
                .unwrap_or_else(|| Error::NotFound("no summaries to combine".into())));
        }
        let files: Vec<String> = parts.iter().map(|(f, _)| f.clone()).collect();

        let text = if let [(_, only)] = parts.as_slice() {
            only.clone()
        } else {
            let sections = self.aggregator.attributed_sections(&parts);
            self.generate(&prompts::combine(&sections, &self.config.generation))
                .await?
        };

        let name = SummaryStore::combined_name(&files);
        let metadata = SummaryMetadata::new(
            &name,
            SummaryKind::Combined,
            files.clone(),
            &self.config.generation.model,
        );
        self.summaries.save(session_id, &text, metadata)?;
        info!(
            "{:?} {} files ({} reused, {} generated, {} failed)",
            Verb::Combine,
            files.len(),
            files.len() - generated.len(),
            generated.len(),
            failed.len()
        );
        Ok(CombinedSummary {
            name,
            text,
            files,
            generated,
            failed,
        })
    }

    /// Compress a (combined) summary into a short executive overview.
    pub async fn condense(&self, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Err(Error::MalformedInput("nothing to condense".into()));
        }
        debug!("{:?} {} chars", Verb::Condense, text.chars().count());
        self.generate(&prompts::condense(text, &self.config.generation))
            .await
    }

    // ----- cross-document analysis -----

    /// Themes shared across the given files (or the session selection).
    /// A missing or untrustworthy index yields `Unavailable`, not an error.
    pub fn analyze_cross_documents(
        &self,
        session_id: &str,
        filenames: &[String],
    ) -> Result<AnalysisOutcome> {
        match self.cross_document_report(session_id, filenames) {
            Ok((report, _)) => Ok(AnalysisOutcome::Ready {
                report,
                narrative: None,
            }),
            Err(e) => analysis_unavailable(session_id, e),
        }
    }

    /// Like [`Engine::analyze_cross_documents`], then ask the generator to
    /// explain the shared themes. No generation happens when none were found.
    pub async fn explain_cross_documents(
        &self,
        session_id: &str,
        filenames: &[String],
        question: &str,
    ) -> Result<AnalysisOutcome> {
        let (report, results) = match self.cross_document_report(session_id, filenames) {
            Ok(found) => found,
            Err(e) => return analysis_unavailable(session_id, e),
        };
        if report.is_empty() {
            return Ok(AnalysisOutcome::Ready {
                report,
                narrative: None,
            });
        }

        let context = self
            .aggregator
            .assemble(question, AnalysisIntent::ComprehensiveSummary, &results);
        let prompt = prompts::cross_document(
            question,
            &report.render(),
            &context.text,
            &self.config.generation,
        );
        let narrative = self.generate(&prompt).await?;
        Ok(AnalysisOutcome::Ready {
            report,
            narrative: Some(narrative),
        })
    }

    fn cross_document_report(
        &self,
        session_id: &str,
        filenames: &[String],
    ) -> Result<(CrossDocumentReport, Vec<RetrievalResult>)> {
        let session = self.registry.open(session_id)?;
        let request = RetrievalRequest::exhaustive("", scope(Some(session.as_ref()), filenames));
        let retrieval = self.retriever.retrieve_in(Some(session.index()), &request)?;

        let chunks: Vec<AnalysisChunk> = session.index().read(|idx| {
            retrieval
                .results
                .iter()
                .map(|result| {
                    let chunk = AnalysisChunk::from_result(result);
                    let same_chunk = idx
                        .metadata()
                        .get(result.position)
                        .is_some_and(|m| m.chunk_id == result.chunk_id);
                    match idx.vector(result.position) {
                        Some(vector) if same_chunk => chunk.with_embedding(vector),
                        _ => chunk,
                    }
                })
                .collect()
        });

        debug!("{:?} {} chunks in session {}", Verb::Analyze, chunks.len(), session_id);
        Ok((self.analyzer.analyze(&chunks), retrieval.results))
    }

    // ----- session lifecycle -----

    pub fn persist(&self, session_id: &str) -> Result<IndexManifest> {
        self.registry.persist(session_id)
    }

    pub fn persist_all(&self) -> Result<usize> {
        self.registry.persist_all()
    }

    /// Persist and unload sessions untouched for `idle`.
    pub fn evict_idle(&self, idle: Duration) -> Result<usize> {
        self.registry.evict_idle(idle)
    }

    pub fn list_sessions(&self) -> Result<Vec<String>> {
        self.registry.list_sessions()
    }

    /// Drop a session's index and its saved summaries.
    pub fn remove_session(&self, session_id: &str) -> Result<bool> {
        self.summaries.remove_session(session_id)?;
        self.registry.remove(session_id)
    }

    // ----- helpers -----

    fn open_session(&self, session_id: &str) -> Result<Option<Arc<Session>>> {
        match self.registry.open(session_id) {
            Ok(session) => Ok(Some(session)),
            Err(Error::IndexNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let generation = &self.config.generation;
        generate_with_retry(
            self.generator.as_ref(),
            request,
            &generation.retry,
            generation.timeout(),
        )
        .await
    }
}

/// Explicit filenames win; otherwise the session's selection. Empty means
/// every file.
fn scope(session: Option<&Session>, requested: &[String]) -> Vec<String> {
    if !requested.is_empty() {
        return requested.to_vec();
    }
    session.map(|s| s.selected_filenames()).unwrap_or_default()
}

fn document_id(document: &Document) -> String {
    let hash = content_hash(&format!("{}\u{0}{}", document.filename, document.full_text()));
    format!("doc_{}", &hash[..16])
}

fn analysis_unavailable(session_id: &str, e: Error) -> Result<AnalysisOutcome> {
    if e.is_structural() || matches!(e, Error::IndexNotFound(_)) {
        warn!("Cross-document analysis unavailable for {}: {}", session_id, e);
        Ok(AnalysisOutcome::Unavailable {
            reason: e.to_string(),
        })
    } else {
        Err(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsage_core::Metric;

    #[test]
    fn test_document_id_depends_on_name_and_text() {
        let a = Document::from_text("", "a.txt", "same text");
        let b = Document::from_text("", "b.txt", "same text");
        assert_ne!(document_id(&a), document_id(&b));
        assert_eq!(document_id(&a), document_id(&a.clone()));
        assert!(document_id(&a).starts_with("doc_"));
    }

    #[test]
    fn test_scope_prefers_explicit_filenames() {
        let session = Session::empty("s", "/tmp/unused", Metric::InnerProduct);
        session.select(vec!["picked.txt".into()]);
        assert_eq!(scope(Some(&session), &[]), vec!["picked.txt"]);
        assert_eq!(scope(Some(&session), &["x.txt".into()]), vec!["x.txt"]);
        assert!(scope(None, &[]).is_empty());
    }
}
