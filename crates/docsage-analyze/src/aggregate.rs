//! Summary context assembly.
//!
//! Retrieval results are split into tables and text. Tables render as pipe
//! tables ahead of the text body, text is grouped under per-file headers,
//! and a digest of extracted entities goes on top. When the whole thing
//! exceeds `max_context_chars`, pieces are admitted by priority:
//! query-relevant text, then tables, then remaining text, then the digest.
//! The first piece that does not fit is cut short (or dropped when too
//! little room is left) and everything below it is left out.

use std::collections::{BTreeMap, HashMap, HashSet};

use docsage_core::{ContextConfig, ExtractionConfig};
use docsage_ingest::extract::entities::extract_entities;
use docsage_ingest::extract::terms::{significant_terms, stem};
use docsage_ingest::{EntityKind, ExtractedEntity, Table, TableExtractor};
use docsage_retrieve::{RetrievalMode, RetrievalResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A piece is cut rather than dropped only if this much of it survives.
const MIN_FRAGMENT_CHARS: usize = 200;

const SUMMARY_KEYWORDS: &[&str] = &[
    "summary",
    "summarize",
    "summarise",
    "overview",
    "all documents",
    "all files",
    "entire document",
    "whole document",
    "comprehensive",
    "key points",
    "executive",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisIntent {
    /// A targeted question: small top-k retrieval.
    Specific,
    /// Whole-document coverage: exhaustive retrieval with fallback.
    ComprehensiveSummary,
}

impl AnalysisIntent {
    /// An explicit flag wins; otherwise summary keywords (or no query at all)
    /// mean a comprehensive summary.
    pub fn classify(query: &str, comprehensive: Option<bool>) -> Self {
        if let Some(flag) = comprehensive {
            return if flag {
                Self::ComprehensiveSummary
            } else {
                Self::Specific
            };
        }
        let lower = query.to_lowercase();
        if lower.trim().is_empty() || SUMMARY_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Self::ComprehensiveSummary
        } else {
            Self::Specific
        }
    }

    pub fn retrieval_mode(&self) -> RetrievalMode {
        match self {
            Self::Specific => RetrievalMode::TopK,
            Self::ComprehensiveSummary => RetrievalMode::Exhaustive,
        }
    }
}

/// Everything the aggregator can feed into a context, explicitly tagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextItem {
    Table(Table),
    EntityMatch(ExtractedEntity),
    Chunk(RetrievalResult),
}

/// Assembled generation context plus what went into it.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledContext {
    pub intent: AnalysisIntent,
    pub text: String,
    pub items: Vec<ContextItem>,
    /// Files with text in the context, in result order.
    pub filenames: Vec<String>,
    pub chunks_total: usize,
    pub chunks_included: usize,
    pub tables_total: usize,
    pub tables_included: usize,
    /// Some piece was cut or left out for budget.
    pub truncated: bool,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[derive(Debug, Clone)]
enum Piece {
    Digest(String),
    Table(String),
    Text {
        filename: String,
        position: usize,
        text: String,
    },
}

impl Piece {
    fn text(&self) -> &str {
        match self {
            Piece::Digest(t) | Piece::Table(t) => t,
            Piece::Text { text, .. } => text,
        }
    }

    fn set_text(&mut self, new: String) {
        match self {
            Piece::Digest(t) | Piece::Table(t) => *t = new,
            Piece::Text { text, .. } => *text = new,
        }
    }
}

pub struct SummaryAggregator {
    config: ContextConfig,
    tables: TableExtractor,
}

impl SummaryAggregator {
    pub fn new(config: ContextConfig, extraction: ExtractionConfig) -> Self {
        Self {
            config,
            tables: TableExtractor::new(extraction),
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Tables, entities and the chunk itself for every result, in order.
    pub fn collect(&self, results: &[RetrievalResult]) -> Vec<ContextItem> {
        let mut items = Vec::new();
        for result in results {
            items.extend(
                self.tables
                    .extract(&result.chunk_id, &result.content)
                    .into_iter()
                    .map(ContextItem::Table),
            );
            items.extend(
                extract_entities(&result.chunk_id, &result.content)
                    .into_iter()
                    .map(ContextItem::EntityMatch),
            );
            items.push(ContextItem::Chunk(result.clone()));
        }
        items
    }

    pub fn assemble(
        &self,
        query: &str,
        intent: AnalysisIntent,
        results: &[RetrievalResult],
    ) -> AssembledContext {
        let items = self.collect(results);
        let query_terms: HashSet<String> = significant_terms(query, 3, 32).into_iter().collect();

        let mut relevant = Vec::new();
        let mut remaining = Vec::new();
        let mut tables = Vec::new();
        let mut seen_tables = HashSet::new();
        let mut entities: Vec<&ExtractedEntity> = Vec::new();

        let by_chunk = items_by_chunk(&items);
        for result in results {
            let (chunk_tables, chunk_entities) = by_chunk
                .get(result.chunk_id.as_str())
                .cloned()
                .unwrap_or_default();
            entities.extend(chunk_entities);

            for table in &chunk_tables {
                let markdown = table.to_markdown();
                if seen_tables.insert(markdown.clone()) {
                    tables.push(Piece::Table(table_block(table, result, &markdown)));
                }
            }

            let body = strip_tables(&result.content, &chunk_tables);
            if body.is_empty() {
                continue;
            }
            let piece = Piece::Text {
                filename: result.filename.clone(),
                position: result.position,
                text: body,
            };
            if result.score.is_some() || mentions_any(&result.content, &query_terms) {
                relevant.push(piece);
            } else {
                remaining.push(piece);
            }
        }

        let tables_total = tables.len();
        let mut candidates: Vec<Piece> = Vec::new();
        candidates.extend(relevant);
        candidates.extend(tables);
        candidates.extend(remaining);
        if let Some(digest) = self.digest(&entities) {
            candidates.push(Piece::Digest(digest));
        }

        let file_order = file_order(results);
        let (selected, truncated) = self.fit(candidates, &file_order);
        let text = render(&selected, &file_order);

        let included_files: HashSet<&str> = selected
            .iter()
            .filter_map(|p| match p {
                Piece::Text { filename, .. } => Some(filename.as_str()),
                _ => None,
            })
            .collect();
        let context = AssembledContext {
            intent,
            chunks_total: results.len(),
            chunks_included: selected
                .iter()
                .filter(|p| matches!(p, Piece::Text { .. }))
                .count(),
            tables_total,
            tables_included: selected.iter().filter(|p| matches!(p, Piece::Table(_))).count(),
            filenames: file_order
                .into_iter()
                .filter(|f| included_files.contains(f.as_str()))
                .collect(),
            truncated,
            text,
            items,
        };
        info!(
            "Assembled {:?} context: {} chars, {}/{} chunks, {}/{} tables{}",
            intent,
            context.text.chars().count(),
            context.chunks_included,
            context.chunks_total,
            context.tables_included,
            context.tables_total,
            if context.truncated { " (truncated)" } else { "" }
        );
        context
    }

    /// Per-file outputs joined under `=== filename ===` headers, each cut to
    /// an equal share of the context budget.
    pub fn attributed_sections(&self, parts: &[(String, String)]) -> String {
        if parts.is_empty() {
            return String::new();
        }
        let share = (self.config.max_context_chars / parts.len()).max(MIN_FRAGMENT_CHARS);
        parts
            .iter()
            .map(|(filename, text)| {
                let header = format!("=== {filename} ===\n");
                let room = share.saturating_sub(header.chars().count());
                format!("{header}{}", truncate_chars(text.trim(), room))
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Entities grouped by kind, capped per kind.
    fn digest(&self, entities: &[&ExtractedEntity]) -> Option<String> {
        let mut by_kind: BTreeMap<EntityKind, Vec<&str>> = BTreeMap::new();
        for entity in entities {
            let values = by_kind.entry(entity.kind).or_default();
            if values.len() < self.config.max_entities_per_kind
                && !values.contains(&entity.value.as_str())
            {
                values.push(&entity.value);
            }
        }
        if by_kind.is_empty() {
            return None;
        }
        let mut out = String::from("Key information:");
        for (kind, values) in by_kind {
            out.push_str(&format!("\n- {}: {}", kind.label(), values.join(", ")));
        }
        Some(out)
    }

    /// Admit pieces in priority order while the rendering fits the budget.
    fn fit(&self, candidates: Vec<Piece>, file_order: &[String]) -> (Vec<Piece>, bool) {
        let max = self.config.max_context_chars;
        let mut selected: Vec<Piece> = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            selected.push(candidate);
            let len = render(&selected, file_order).chars().count();
            if len <= max {
                continue;
            }

            let overflow = len - max;
            let Some(mut last) = selected.pop() else { break };
            let piece_len = last.text().chars().count();
            let keep = piece_len.saturating_sub(overflow);
            if keep >= MIN_FRAGMENT_CHARS {
                let cut = truncate_chars(last.text(), keep);
                last.set_text(cut);
                selected.push(last);
                if render(&selected, file_order).chars().count() > max {
                    selected.pop();
                }
            }
            debug!("Context budget of {} chars reached", max);
            return (selected, true);
        }
        (selected, false)
    }
}

type ChunkExtras<'a> = (Vec<&'a Table>, Vec<&'a ExtractedEntity>);

/// Tables and entities grouped by the chunk they came from.
fn items_by_chunk(items: &[ContextItem]) -> HashMap<&str, ChunkExtras<'_>> {
    let mut grouped: HashMap<&str, ChunkExtras<'_>> = HashMap::new();
    for item in items {
        match item {
            ContextItem::Table(t) => grouped.entry(t.chunk_id.as_str()).or_default().0.push(t),
            ContextItem::EntityMatch(e) => grouped.entry(e.chunk_id.as_str()).or_default().1.push(e),
            ContextItem::Chunk(_) => {}
        }
    }
    grouped
}

fn table_block(table: &Table, result: &RetrievalResult, markdown: &str) -> String {
    let mut label = format!("[Table from {}", result.filename);
    if let Some(page) = result.page {
        label.push_str(&format!(", page {page}"));
    }
    if table.is_low_confidence() {
        label.push_str(", low confidence");
    }
    format!("{label}]\n{markdown}")
}

/// Chunk text with table lines removed.
fn strip_tables(content: &str, tables: &[&Table]) -> String {
    content
        .lines()
        .enumerate()
        .filter(|(i, _)| !tables.iter().any(|t| (t.line_start..t.line_end).contains(i)))
        .map(|(_, line)| line)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn mentions_any(content: &str, query_terms: &HashSet<String>) -> bool {
    if query_terms.is_empty() {
        return false;
    }
    content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .any(|w| query_terms.contains(&stem(w)))
}

fn file_order(results: &[RetrievalResult]) -> Vec<String> {
    let mut seen = HashSet::new();
    results
        .iter()
        .filter(|r| seen.insert(r.filename.as_str()))
        .map(|r| r.filename.clone())
        .collect()
}

/// Digest, then tables, then text grouped per file in position order.
fn render(pieces: &[Piece], file_order: &[String]) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.extend(
        pieces
            .iter()
            .filter(|p| matches!(p, Piece::Digest(_)))
            .map(|p| p.text().to_string()),
    );

    let tables: Vec<&str> = pieces
        .iter()
        .filter(|p| matches!(p, Piece::Table(_)))
        .map(Piece::text)
        .collect();
    if !tables.is_empty() {
        sections.push(tables.join("\n\n"));
    }

    for filename in file_order {
        let mut texts: Vec<(usize, &str)> = pieces
            .iter()
            .filter_map(|p| match p {
                Piece::Text {
                    filename: f,
                    position,
                    text,
                } if f == filename => Some((*position, text.as_str())),
                _ => None,
            })
            .collect();
        if texts.is_empty() {
            continue;
        }
        texts.sort_by_key(|(position, _)| *position);
        let body: Vec<&str> = texts.into_iter().map(|(_, t)| t).collect();
        sections.push(format!("=== {filename} ===\n{}", body.join("\n\n")));
    }

    sections.join("\n\n")
}

/// At most `max` characters, ending in an ellipsis when cut.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut cut: String = text.chars().take(max - 1).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(chunk_id: &str, filename: &str, position: usize, content: &str, score: Option<f32>) -> RetrievalResult {
        RetrievalResult {
            chunk_id: chunk_id.into(),
            rank: position + 1,
            score,
            filename: filename.into(),
            document_id: filename.into(),
            content: content.into(),
            page: None,
            chunk_index: position,
            position,
            section: None,
            rerank_score: None,
        }
    }

    fn aggregator(max_context_chars: usize) -> SummaryAggregator {
        SummaryAggregator::new(
            ContextConfig {
                max_context_chars,
                ..ContextConfig::default()
            },
            ExtractionConfig::default(),
        )
    }

    #[test]
    fn test_intent_classification() {
        assert_eq!(
            AnalysisIntent::classify("Summarize all documents", None),
            AnalysisIntent::ComprehensiveSummary
        );
        assert_eq!(
            AnalysisIntent::classify("When is the submission deadline?", None),
            AnalysisIntent::Specific
        );
        assert_eq!(AnalysisIntent::classify("", None), AnalysisIntent::ComprehensiveSummary);
        assert_eq!(
            AnalysisIntent::classify("give me an overview", Some(false)),
            AnalysisIntent::Specific
        );
        assert_eq!(
            AnalysisIntent::ComprehensiveSummary.retrieval_mode(),
            RetrievalMode::Exhaustive
        );
    }

    #[test]
    fn test_tables_precede_text_with_file_headers() {
        let results = vec![
            result("a0", "a.txt", 0, "Scope of work covers cabling.", None),
            result("a1", "a.txt", 1, "Item | Qty\nCable | 40\nSwitch | 2", None),
            result("b0", "b.txt", 2, "Vendor B offers support.", None),
        ];
        let ctx = aggregator(10_000).assemble("", AnalysisIntent::ComprehensiveSummary, &results);

        let table_at = ctx.text.find("| Item | Qty |").unwrap();
        let a_at = ctx.text.find("=== a.txt ===").unwrap();
        let b_at = ctx.text.find("=== b.txt ===").unwrap();
        assert!(table_at < a_at && a_at < b_at);
        assert!(ctx.text.contains("[Table from a.txt]"));
        assert_eq!(ctx.tables_total, 1);
        assert_eq!(ctx.tables_included, 1);
        // The table-only chunk leaves no text piece.
        assert_eq!(ctx.chunks_included, 2);
        assert!(!ctx.truncated);
        assert_eq!(ctx.filenames, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_budget_keeps_relevant_text_first() {
        let filler = "General background about the organisation and its history. ".repeat(10);
        let mut results: Vec<RetrievalResult> = (0..6)
            .map(|i| result(&format!("c{i}"), "a.txt", i, &filler, None))
            .collect();
        results.push(result("c6", "a.txt", 6, "The penalty clause applies after thirty days.", None));

        let ctx = aggregator(900).assemble("penalty clause", AnalysisIntent::ComprehensiveSummary, &results);
        assert!(ctx.text.chars().count() <= 900);
        assert!(ctx.truncated);
        assert!(ctx.text.contains("The penalty clause applies"));
        assert!(ctx.chunks_included < ctx.chunks_total);
    }

    #[test]
    fn test_tables_outrank_unrelated_text() {
        let filler = "Unrelated narrative text. ".repeat(40);
        let results = vec![
            result("a0", "a.txt", 0, &filler, None),
            result("a1", "a.txt", 1, "Region | Total\nNorth | 10\nSouth | 12", None),
        ];
        let ctx = aggregator(400).assemble("", AnalysisIntent::ComprehensiveSummary, &results);
        assert!(ctx.text.chars().count() <= 400);
        assert_eq!(ctx.tables_included, 1);
        assert!(ctx.truncated);
    }

    #[test]
    fn test_entity_digest() {
        let results = vec![
            result("a0", "a.txt", 0, "Submit to bids@city.gov by 2024-05-01.", Some(0.9)),
            result("b0", "b.txt", 1, "Contact bids@city.gov for the $4,500 deposit.", Some(0.8)),
        ];
        let ctx = aggregator(5_000).assemble("deadline", AnalysisIntent::Specific, &results);
        assert!(ctx.text.starts_with("Key information:"));
        assert!(ctx.text.contains("- Emails: bids@city.gov\n"));
        assert!(ctx.text.contains("- Dates: 2024-05-01"));
        assert!(ctx.text.contains("- Amounts: $4,500"));
    }

    #[test]
    fn test_context_items_are_tagged() {
        let results = vec![result("a0", "a.txt", 0, "Email ops@x.io\n\nA | B\n1 | 2", Some(1.0))];
        let items = aggregator(1_000).collect(&results);
        let kinds: Vec<String> = items
            .iter()
            .map(|i| serde_json::to_value(i).unwrap()["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, vec!["table", "entity_match", "chunk"]);
    }

    #[test]
    fn test_attributed_sections_keep_order() {
        let parts = vec![
            ("b.pdf".to_string(), "Summary of B.".to_string()),
            ("a.pdf".to_string(), "Summary of A.".to_string()),
        ];
        let out = aggregator(1_000).attributed_sections(&parts);
        assert_eq!(out, "=== b.pdf ===\nSummary of B.\n\n=== a.pdf ===\nSummary of A.");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 4), "abc…");
        assert_eq!(truncate_chars("abc", 4), "abc");
    }
}
