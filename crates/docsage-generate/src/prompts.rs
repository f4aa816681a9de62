//! Instruction templates sent to the generation collaborator.

use docsage_core::GenerationConfig;

use crate::types::{GenerationRequest, PromptKind};

pub fn summary(filename: &str, context: &str, config: &GenerationConfig) -> GenerationRequest {
    let prompt = format!(
        "Write a factual, detailed summary of the document \"{filename}\".\n\
         Cover its purpose, requirements, figures, dates, obligations and contacts.\n\
         Use markdown headings (##) and bullet points. Keep every number exactly as written.\n\
         Aim for roughly a third of the source length.\n\n\
         Document content:\n{context}\n"
    );
    GenerationRequest::new(PromptKind::Summary, prompt, config)
}

/// `sections` is the per-file material, each part under its own
/// `=== filename ===` header so the model can attribute facts.
pub fn combine(sections: &str, config: &GenerationConfig) -> GenerationRequest {
    let prompt = format!(
        "Merge the per-document summaries below into one report.\n\
         Open with a short executive summary, then organise the details by topic.\n\
         Drop repetition but keep every figure and date, and say which document each one comes from.\n\
         Use markdown.\n\n{sections}\n"
    );
    GenerationRequest::new(PromptKind::Combine, prompt, config)
}

pub fn condense(summary: &str, config: &GenerationConfig) -> GenerationRequest {
    let prompt = format!(
        "Rewrite the following report as an executive overview of three paragraphs.\n\
         Keep only the critical facts, key metrics and required actions.\n\n{summary}\n"
    );
    GenerationRequest::new(PromptKind::Condense, prompt, config)
}

pub fn answer(question: &str, context: &str, config: &GenerationConfig) -> GenerationRequest {
    let prompt = format!(
        "Answer the question using only the document excerpts below.\n\
         Cite the source file for each fact. If the excerpts do not contain the answer, say so.\n\n\
         Excerpts:\n{context}\n\n\
         Question: {question}\n\nAnswer:"
    );
    GenerationRequest::new(PromptKind::Answer, prompt, config)
}

/// `findings` is the rendered cross-document report; `context` the
/// assembled excerpts it was computed from.
pub fn cross_document(
    question: &str,
    findings: &str,
    context: &str,
    config: &GenerationConfig,
) -> GenerationRequest {
    let prompt = format!(
        "Several documents were compared and the following shared themes were found:\n\
         {findings}\n\n\
         Using the excerpts below, explain how the documents relate, where they agree and where they differ.\n\
         Only describe a theme as shared when it is supported by more than one file.\n\n\
         Excerpts:\n{context}\n\n\
         Request: {question}\n"
    );
    GenerationRequest::new(PromptKind::CrossDocument, prompt, config)
}
