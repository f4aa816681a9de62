//! Retrieval over a session's vector index.
//!
//! Two modes: targeted top-k similarity search, and exhaustive retrieval of
//! every chunk of the selected files. Exhaustive retrieval that comes back
//! empty falls back to top-k with an enlarged `k`. Top-k candidates can be
//! reordered by a second-stage [`Reranker`].

pub mod rerank;
pub mod retriever;
pub mod types;

pub use rerank::{LexicalReranker, Reranker};
pub use retriever::Retriever;
pub use types::*;
