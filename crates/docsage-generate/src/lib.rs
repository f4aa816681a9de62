//! Generation collaborator: the `Generator` trait, an Ollama provider,
//! per-attempt timeouts with exponential backoff, and prompt templates.
//!
//! The model's behaviour is out of scope; this crate only defines how the
//! engine talks to it and how failures come back.

pub mod prompts;
pub mod providers;
pub mod retry;
pub mod types;

pub use providers::{Generator, OllamaGenerator};
pub use retry::generate_with_retry;
pub use types::*;
