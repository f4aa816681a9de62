//! Second-stage reranking of top-k candidates.
//!
//! A `Reranker` scores (query, passage) pairs. The retriever pulls a larger
//! candidate pool by similarity, reorders it by reranker score and keeps the
//! best `k`. A failing reranker never fails retrieval: the similarity order
//! is kept instead.

use std::collections::{HashMap, HashSet};

use docsage_core::{Error, Result};
use tracing::{debug, warn};

use crate::types::RetrievalResult;

pub trait Reranker: Send + Sync {
    /// One relevance score per passage, higher is better.
    fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>>;

    fn name(&self) -> &str;
}

/// Query-term coverage weighted by inverse document frequency over the
/// candidate pool. Scores fall in [0, 1].
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalReranker;

const MIN_TERM_CHARS: usize = 3;

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_TERM_CHARS)
        .map(str::to_lowercase)
        .collect()
}

impl Reranker for LexicalReranker {
    fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        let query_terms = terms(query);
        let passage_terms: Vec<HashSet<String>> = passages.iter().map(|p| terms(p)).collect();
        if query_terms.is_empty() {
            return Ok(vec![0.0; passages.len()]);
        }

        let n = passages.len() as f32;
        let idf: HashMap<&str, f32> = query_terms
            .iter()
            .map(|t| {
                let df = passage_terms.iter().filter(|p| p.contains(t)).count() as f32;
                (t.as_str(), (1.0 + n / (1.0 + df)).ln())
            })
            .collect();
        let total: f32 = idf.values().sum();

        Ok(passage_terms
            .iter()
            .map(|p| {
                let hit: f32 = idf.iter().filter(|(t, _)| p.contains(**t)).map(|(_, w)| w).sum();
                if total > 0.0 {
                    hit / total
                } else {
                    0.0
                }
            })
            .collect())
    }

    fn name(&self) -> &str {
        "lexical"
    }
}

/// Reorder `candidates` by reranker score and keep the best `k`. Ties keep
/// similarity order. Ranks are renumbered from 1.
pub fn rerank(
    reranker: &dyn Reranker,
    query: &str,
    mut candidates: Vec<RetrievalResult>,
    k: usize,
) -> Vec<RetrievalResult> {
    let passages: Vec<&str> = candidates.iter().map(|r| r.content.as_str()).collect();
    let scores = reranker.score(query, &passages).and_then(|scores| {
        if scores.len() == candidates.len() {
            Ok(scores)
        } else {
            Err(Error::Inference(format!(
                "reranker {} returned {} scores for {} passages",
                reranker.name(),
                scores.len(),
                candidates.len()
            )))
        }
    });

    match scores {
        Ok(scores) => {
            for (result, score) in candidates.iter_mut().zip(scores) {
                result.rerank_score = Some(score);
            }
            candidates.sort_by(|a, b| {
                let (a, b) = (a.rerank_score.unwrap_or(0.0), b.rerank_score.unwrap_or(0.0));
                b.total_cmp(&a)
            });
            debug!("Reranked {} candidates with {}", candidates.len(), reranker.name());
        }
        Err(e) => warn!("Reranking failed, keeping similarity order: {}", e),
    }

    candidates.truncate(k);
    for (i, result) in candidates.iter_mut().enumerate() {
        result.rank = i + 1;
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(chunk_id: &str, content: &str, rank: usize) -> RetrievalResult {
        RetrievalResult {
            chunk_id: chunk_id.into(),
            rank,
            score: Some(1.0 - rank as f32 / 10.0),
            filename: "a.txt".into(),
            document_id: "a".into(),
            content: content.into(),
            page: None,
            chunk_index: rank,
            position: rank,
            section: None,
            rerank_score: None,
        }
    }

    struct Broken;

    impl Reranker for Broken {
        fn score(&self, _query: &str, _passages: &[&str]) -> Result<Vec<f32>> {
            Err(Error::Inference("model missing".into()))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    #[test]
    fn test_lexical_prefers_rare_query_terms() {
        let scores = LexicalReranker
            .score(
                "warranty replacement",
                &["the warranty covers replacement", "warranty only", "unrelated text"],
            )
            .unwrap();
        assert!(scores[0] > scores[1]);
        assert!(scores[1] > scores[2]);
        assert_eq!(scores[2], 0.0);
        assert!((scores[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rerank_reorders_and_renumbers() {
        let candidates = vec![
            result("c0", "delivery schedule", 1),
            result("c1", "warranty replacement terms", 2),
            result("c2", "warranty notes", 3),
        ];
        let out = rerank(&LexicalReranker, "warranty replacement", candidates, 2);
        let ids: Vec<&str> = out.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, ["c1", "c2"]);
        assert_eq!(out[0].rank, 1);
        assert_eq!(out[1].rank, 2);
        assert!(out[0].rerank_score.unwrap() > out[1].rerank_score.unwrap());
    }

    #[test]
    fn test_failing_reranker_keeps_similarity_order() {
        let candidates = vec![result("c0", "a", 1), result("c1", "b", 2), result("c2", "c", 3)];
        let out = rerank(&Broken, "query", candidates, 2);
        let ids: Vec<&str> = out.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, ["c0", "c1"]);
        assert!(out.iter().all(|r| r.rerank_score.is_none()));
    }
}
