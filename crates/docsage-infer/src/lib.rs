//! DocSage Infer: embedding backends and the embedding cache.
//!
//! `create_embedder` picks the ONNX backend when the `onnx` feature is on and
//! model files are present; otherwise the deterministic `HashingEmbedder` is
//! used. Either way the backend is fronted by an `EmbeddingCache`.

pub mod cache;
pub mod embedder;
pub mod onnx_embedder;

pub use cache::{CacheStats, EmbeddingCache};
pub use embedder::{CachedEmbedder, EmbedderBackend, EmbeddingResult, HashingEmbedder};

#[cfg(feature = "onnx")]
pub use onnx_embedder::OnnxEmbedder;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use docsage_core::EngineConfig;

/// Create the best available embedder, wrapped in a cache sized from `config`.
pub fn create_embedder(model_dir: &Path, config: &EngineConfig) -> Arc<dyn EmbedderBackend> {
    let backend = select_backend(model_dir, config.index.dimension);
    Arc::new(CachedEmbedder::new(
        backend,
        config.retrieval.query_cache_size,
        Duration::from_secs(config.retrieval.query_cache_ttl_secs),
    ))
}

fn select_backend(model_dir: &Path, dimension: usize) -> Arc<dyn EmbedderBackend> {
    #[cfg(feature = "onnx")]
    {
        match OnnxEmbedder::load(model_dir) {
            Ok(embedder) => {
                tracing::info!("Using ONNX embedder (dim={})", embedder.dimension());
                return Arc::new(embedder);
            }
            Err(e) => {
                tracing::warn!("ONNX embedder unavailable: {}. Falling back to hashing embedder.", e);
            }
        }
    }

    #[cfg(not(feature = "onnx"))]
    {
        let _ = model_dir;
        tracing::info!("ONNX feature disabled. Using hashing embedder (dim={}).", dimension);
    }

    Arc::new(HashingEmbedder::new(dimension))
}
