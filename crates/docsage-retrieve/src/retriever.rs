//! Top-k and exhaustive retrieval with budget-aware fallback.

use std::collections::HashSet;
use std::sync::Arc;

use docsage_core::{Error, Metric, Result, RetrievalConfig};
use docsage_infer::EmbedderBackend;
use docsage_store::{ChunkMetadata, SessionIndex, SessionRegistry};
use tracing::{debug, info, warn};

use crate::rerank::{rerank, Reranker};
use crate::types::{Retrieval, RetrievalMode, RetrievalRequest, RetrievalResult};

pub struct Retriever {
    embedder: Arc<dyn EmbedderBackend>,
    reranker: Option<Arc<dyn Reranker>>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbedderBackend>, config: RetrievalConfig) -> Self {
        Self {
            embedder,
            reranker: None,
            config,
        }
    }

    /// Rerank top-k candidates. Takes effect only when `rerank_pool` is set.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Resolve the session, run the requested mode, and fall back when
    /// exhaustive retrieval finds nothing. A session with no index (resident
    /// or persisted) behaves like an empty one.
    pub fn retrieve(
        &self,
        registry: &SessionRegistry,
        session_id: &str,
        request: &RetrievalRequest,
    ) -> Result<Retrieval> {
        let session = match registry.open(session_id) {
            Ok(session) => Some(session),
            Err(Error::IndexNotFound(_)) => {
                debug!("No index for session {}", session_id);
                None
            }
            Err(e) => return Err(e),
        };
        self.retrieve_in(session.as_ref().map(|s| s.index()), request)
    }

    /// Like [`Retriever::retrieve`] against an already resolved index.
    pub fn retrieve_in(
        &self,
        index: Option<&SessionIndex>,
        request: &RetrievalRequest,
    ) -> Result<Retrieval> {
        let k = request.k.unwrap_or(self.config.top_k);
        let Some(index) = index else {
            if request.mode == RetrievalMode::Exhaustive {
                warn!("Exhaustive retrieval found no index, falling back to top-k");
            }
            return Ok(Retrieval {
                requested: request.mode,
                used: RetrievalMode::TopK,
                results: Vec::new(),
            });
        };

        match request.mode {
            RetrievalMode::TopK => Ok(Retrieval {
                requested: RetrievalMode::TopK,
                used: RetrievalMode::TopK,
                results: self.top_k(index, &request.query, k, &request.filenames)?,
            }),
            RetrievalMode::Exhaustive => {
                let results = self.exhaustive(index, &request.filenames);
                if !results.is_empty() {
                    return Ok(Retrieval {
                        requested: RetrievalMode::Exhaustive,
                        used: RetrievalMode::Exhaustive,
                        results,
                    });
                }

                let fallback_k = self.config.exhaustive_fallback_k.max(k);
                warn!(
                    "Exhaustive retrieval returned nothing for {:?}, falling back to top-{}",
                    request.filenames, fallback_k
                );
                let query = fallback_query(request);
                Ok(Retrieval {
                    requested: RetrievalMode::Exhaustive,
                    used: RetrievalMode::TopK,
                    results: self.top_k(index, &query, fallback_k, &request.filenames)?,
                })
            }
        }
    }

    /// Nearest chunks to `query`, restricted to `filenames` (exact match,
    /// empty keeps all). An empty index or a query with nothing embeddable
    /// yields no results. With a reranker and a `rerank_pool`, the pool is
    /// fetched by similarity and the reranker picks the final `k`.
    pub fn top_k(
        &self,
        index: &SessionIndex,
        query: &str,
        k: usize,
        filenames: &[String],
    ) -> Result<Vec<RetrievalResult>> {
        match (&self.reranker, self.config.rerank_pool) {
            (Some(reranker), Some(pool)) if k > 0 => {
                let candidates = self.similar(index, query, pool.max(k), filenames)?;
                Ok(rerank(reranker.as_ref(), query, candidates, k))
            }
            _ => self.similar(index, query, k, filenames),
        }
    }

    fn similar(
        &self,
        index: &SessionIndex,
        query: &str,
        k: usize,
        filenames: &[String],
    ) -> Result<Vec<RetrievalResult>> {
        if k == 0 || index.is_empty() {
            return Ok(Vec::new());
        }
        let embedding = match self.embedder.embed(query) {
            Ok(result) => result.embedding,
            Err(Error::MalformedInput(reason)) => {
                warn!("Query not embeddable ({}), returning no results", reason);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let filter: HashSet<&str> = filenames.iter().map(String::as_str).collect();
        let (metric, hits) = index.read(|idx| {
            // Filtering happens after ranking, so a filtered search ranks the
            // whole index.
            let search_k = if filter.is_empty() { k } else { idx.len() };
            idx.search(&embedding, search_k).map(|hits| (idx.metric(), hits))
        })?;

        let mut seen = HashSet::new();
        let results: Vec<RetrievalResult> = hits
            .into_iter()
            .filter(|hit| filter.is_empty() || filter.contains(hit.metadata.filename.as_str()))
            .filter(|hit| match (metric, self.config.min_score) {
                (Metric::InnerProduct, Some(min)) => hit.score >= min,
                _ => true,
            })
            .filter(|hit| seen.insert(hit.metadata.chunk_id.clone()))
            .take(k)
            .enumerate()
            .map(|(i, hit)| {
                let score = match metric {
                    Metric::InnerProduct => hit.score.max(0.0),
                    Metric::L2 => hit.score,
                };
                to_result(hit.position, i + 1, Some(score), hit.metadata)
            })
            .collect();

        debug!("Top-{} retrieval returned {} chunks", k, results.len());
        Ok(results)
    }

    /// Every chunk of the given files, in insertion order, unscored.
    pub fn exhaustive(&self, index: &SessionIndex, filenames: &[String]) -> Vec<RetrievalResult> {
        let filter: HashSet<&str> = filenames.iter().map(String::as_str).collect();
        let results: Vec<RetrievalResult> = index.read(|idx| {
            idx.metadata()
                .iter()
                .enumerate()
                .filter(|(_, m)| filter.is_empty() || filter.contains(m.filename.as_str()))
                .enumerate()
                .map(|(i, (position, meta))| to_result(position, i + 1, None, meta.clone()))
                .collect()
        });
        info!(
            "Exhaustive retrieval over {} files returned {} chunks",
            filenames.len(),
            results.len()
        );
        results
    }
}

/// Something embeddable for the fallback search even when the caller sent
/// no query text.
fn fallback_query(request: &RetrievalRequest) -> String {
    if request.query.trim().is_empty() {
        format!("summary of {}", request.filenames.join(" "))
    } else {
        request.query.clone()
    }
}

fn to_result(position: usize, rank: usize, score: Option<f32>, meta: ChunkMetadata) -> RetrievalResult {
    RetrievalResult {
        chunk_id: meta.chunk_id,
        rank,
        score,
        filename: meta.filename,
        document_id: meta.document_id,
        content: meta.content,
        page: meta.page,
        chunk_index: meta.chunk_index,
        position,
        section: meta.section,
        rerank_score: None,
    }
}
