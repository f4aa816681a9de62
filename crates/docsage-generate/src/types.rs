//! Generation request types.

use docsage_core::GenerationConfig;
use serde::{Deserialize, Serialize};

/// Which template a request was built from; decides its token limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Summary,
    Combine,
    Condense,
    Answer,
    CrossDocument,
}

impl PromptKind {
    pub fn max_tokens(&self, config: &GenerationConfig) -> usize {
        match self {
            PromptKind::Summary => config.summary_max_tokens,
            PromptKind::Combine | PromptKind::CrossDocument => config.combine_max_tokens,
            PromptKind::Condense => config.condense_max_tokens,
            PromptKind::Answer => config.answer_max_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub kind: PromptKind,
    pub prompt: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn new(kind: PromptKind, prompt: impl Into<String>, config: &GenerationConfig) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            max_tokens: kind.max_tokens(config),
            temperature: config.temperature,
        }
    }
}
