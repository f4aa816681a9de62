//! Embedding engine trait and implementations.
//!
//! The `EmbedderBackend` trait abstracts over embedding generation.
//! Implementations:
//! - `HashingEmbedder`: deterministic feature-hashing embedder, no model files
//! - `CachedEmbedder`: wraps any backend with an `EmbeddingCache`
//! - `OnnxEmbedder`: sentence-transformer model via ONNX Runtime (`onnx` feature)

use std::sync::Arc;
use std::time::Duration;

use docsage_core::{Error, Result};
use ndarray::Array1;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::cache::{CacheStats, EmbeddingCache};

/// Result of an embedding operation.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub embedding: Array1<f32>,
    /// Whether this was served from cache.
    pub cached: bool,
}

/// Trait for embedding backends.
pub trait EmbedderBackend: Send + Sync {
    /// Embed one text. Text with nothing embeddable is `MalformedInput`.
    fn embed(&self, text: &str) -> Result<EmbeddingResult>;

    /// Embed several texts; fails as a whole if any one fails.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Array1<f32>>> {
        texts
            .iter()
            .map(|t| self.embed(t).map(|r| r.embedding))
            .collect()
    }

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;

    fn is_available(&self) -> bool {
        true
    }
}

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").unwrap());

/// Signed feature hashing over lowercase word unigrams and bigrams,
/// L2-normalized. Identical text always maps to an identical vector.
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn accumulate(&self, v: &mut Array1<f32>, feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dim as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        v[bucket] += sign * weight;
    }
}

impl EmbedderBackend for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<EmbeddingResult> {
        let tokens: Vec<String> = TOKEN_RE
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect();
        if tokens.is_empty() {
            return Err(Error::MalformedInput("no embeddable tokens".into()));
        }

        let mut v = Array1::<f32>::zeros(self.dim);
        for token in &tokens {
            self.accumulate(&mut v, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.accumulate(&mut v, &format!("{} {}", pair[0], pair[1]), 0.5);
        }

        let norm = v.dot(&v).sqrt();
        if norm > 1e-12 {
            v /= norm;
        }
        Ok(EmbeddingResult {
            embedding: v,
            cached: false,
        })
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

/// Any backend fronted by an embedding cache.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbedderBackend>,
    cache: EmbeddingCache,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbedderBackend>, capacity: usize, ttl: Duration) -> Self {
        Self {
            inner,
            cache: EmbeddingCache::new(capacity, ttl),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

impl EmbedderBackend for CachedEmbedder {
    fn embed(&self, text: &str) -> Result<EmbeddingResult> {
        if let Some(embedding) = self.cache.get(text) {
            return Ok(EmbeddingResult {
                embedding,
                cached: true,
            });
        }
        let result = self.inner.embed(text)?;
        self.cache.put(text, result.embedding.clone());
        Ok(result)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}
