//! Overlapping text chunker.
//!
//! Splits each page into chunks of at most `chunk_size` characters (overlap
//! included). A chunk's new text ends at the best boundary available inside
//! its budget, tried in order: paragraph break, sentence end, line break,
//! whitespace. With no boundary past `min_chunk_size` it is cut hard at the
//! budget. Chunks never span pages.
//!
//! Every chunk after the first on a page repeats the last `overlap`
//! characters of its predecessor. Stripping those and concatenating the
//! chunks in order yields the document text exactly; see [`reconstruct`].

use docsage_core::{ChunkingConfig, Result};
use serde::{Deserialize, Serialize};

use crate::source::Document;

/// A chunk of document text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub filename: String,
    pub page: Option<u32>,
    /// Strictly increasing within a document.
    pub chunk_index: usize,
    pub content: String,
    /// Leading characters of `content` shared with the previous chunk.
    pub overlap: usize,
    /// Character offsets of `content` within the document.
    pub char_start: usize,
    pub char_end: usize,
}

impl TextChunk {
    /// `content` without the overlap prefix.
    pub fn body(&self) -> &str {
        match self.content.char_indices().nth(self.overlap) {
            Some((byte, _)) => &self.content[byte..],
            None => "",
        }
    }

    pub fn char_len(&self) -> usize {
        self.char_end - self.char_start
    }
}

/// Concatenate chunk bodies in order.
pub fn reconstruct(chunks: &[TextChunk]) -> String {
    chunks.iter().map(TextChunk::body).collect()
}

/// Character span of one chunk within a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    body_start: usize,
    end: usize,
}

pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    pub fn chunk_document(&self, document: &Document) -> Vec<TextChunk> {
        let mut chunks = Vec::new();
        let mut page_offset = 0;

        for page in &document.pages {
            let chars: Vec<char> = page.text.chars().collect();
            for span in self.split(&chars) {
                let chunk_index = chunks.len();
                chunks.push(TextChunk {
                    chunk_id: format!("{}_chunk_{}", document.id, chunk_index),
                    document_id: document.id.clone(),
                    filename: document.filename.clone(),
                    page: Some(page.number),
                    chunk_index,
                    content: chars[span.start..span.end].iter().collect(),
                    overlap: span.body_start - span.start,
                    char_start: page_offset + span.start,
                    char_end: page_offset + span.end,
                });
            }
            page_offset += chars.len();
        }
        chunks
    }

    /// Chunk a bare string as a single-page document.
    pub fn chunk_text(&self, document_id: &str, filename: &str, text: &str) -> Vec<TextChunk> {
        self.chunk_document(&Document::from_text(document_id, filename, text))
    }

    fn split(&self, chars: &[char]) -> Vec<Span> {
        let n = chars.len();
        let mut spans: Vec<Span> = Vec::new();
        let mut body_start = 0;

        while body_start < n {
            let overlap = match spans.last() {
                Some(prev) => self.config.chunk_overlap.min(body_start - prev.body_start),
                None => 0,
            };
            let budget = self.config.chunk_size - overlap;
            let hard_end = (body_start + budget).min(n);
            let end = if hard_end == n {
                n
            } else {
                let min_body = self.config.min_chunk_size.saturating_sub(overlap).max(1);
                find_break(chars, body_start, hard_end, min_body)
            };
            spans.push(Span {
                start: body_start - overlap,
                body_start,
                end,
            });
            body_start = end;
        }
        spans
    }
}

/// Best break position in `(start + min_body)..=hard_end`, else `hard_end`.
fn find_break(chars: &[char], start: usize, hard_end: usize, min_body: usize) -> usize {
    let lo = start + min_body;
    if lo > hard_end {
        return hard_end;
    }

    let paragraph = |p: usize| p >= start + 2 && chars[p - 1] == '\n' && chars[p - 2] == '\n';
    let sentence = |p: usize| {
        p >= start + 2 && chars[p - 1].is_whitespace() && matches!(chars[p - 2], '.' | '!' | '?')
    };
    let line = |p: usize| chars[p - 1] == '\n';
    let word = |p: usize| chars[p - 1].is_whitespace();

    let tiers: [&dyn Fn(usize) -> bool; 4] = [&paragraph, &sentence, &line, &word];
    for is_break in tiers {
        if let Some(p) = (lo..=hard_end).rev().find(|&p| is_break(p)) {
            return p;
        }
    }
    hard_end
}
