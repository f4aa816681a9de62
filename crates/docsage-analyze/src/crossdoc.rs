//! Cross-document analysis.
//!
//! Themes come from two signals:
//! - significant stemmed terms shared by chunks of different files. Terms
//!   with exactly the same supporting chunks form one theme.
//! - chunks of different files whose embeddings reach the similarity
//!   threshold, clustered transitively.
//!
//! A theme is only kept when its chunks span at least two filenames. File
//! pairs are then weighted by the themes they share.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use docsage_core::AnalysisConfig;
use docsage_ingest::extract::terms::significant_terms;
use docsage_retrieve::RetrievalResult;
use ndarray::{Array1, Array2};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use serde::Serialize;
use tracing::{debug, info};

/// A chunk handed to the analyzer.
#[derive(Debug, Clone)]
pub struct AnalysisChunk {
    pub chunk_id: String,
    pub filename: String,
    pub content: String,
    pub section: Option<String>,
    pub embedding: Option<Array1<f32>>,
}

impl AnalysisChunk {
    pub fn new(
        chunk_id: impl Into<String>,
        filename: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            filename: filename.into(),
            content: content.into(),
            section: None,
            embedding: None,
        }
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Array1<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn from_result(result: &RetrievalResult) -> Self {
        let mut chunk = Self::new(&result.chunk_id, &result.filename, &result.content);
        chunk.section = result.section.clone();
        chunk
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThemeSource {
    SharedTerms,
    SimilarContent,
}

/// A theme supported by at least two documents.
///
/// Only [`CrossDocumentInsight::new`] builds one, and it refuses
/// single-document support.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossDocumentInsight {
    theme: String,
    source: ThemeSource,
    supporting_chunk_ids: Vec<String>,
    filenames: Vec<String>,
    relationship_strength: f32,
}

impl CrossDocumentInsight {
    /// `support` pairs chunk ids with their filenames. `None` unless the
    /// chunks span two or more filenames. Strength is clamped to [0, 100].
    pub fn new(
        theme: impl Into<String>,
        source: ThemeSource,
        support: &[(&str, &str)],
        relationship_strength: f32,
    ) -> Option<Self> {
        let filenames: BTreeSet<&str> = support.iter().map(|(_, f)| *f).collect();
        if filenames.len() < 2 {
            return None;
        }
        Some(Self {
            theme: theme.into(),
            source,
            supporting_chunk_ids: support.iter().map(|(c, _)| c.to_string()).collect(),
            filenames: filenames.into_iter().map(str::to_string).collect(),
            relationship_strength: relationship_strength.clamp(0.0, 100.0),
        })
    }

    pub fn theme(&self) -> &str {
        &self.theme
    }

    pub fn source(&self) -> ThemeSource {
        self.source
    }

    pub fn supporting_chunk_ids(&self) -> &[String] {
        &self.supporting_chunk_ids
    }

    /// Sorted, distinct, at least two.
    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    pub fn relationship_strength(&self) -> f32 {
        self.relationship_strength
    }
}

/// Strength of the link between two documents, in [0, 100].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentRelationship {
    pub a: String,
    pub b: String,
    pub shared_themes: usize,
    pub strength: f32,
}

/// Where one document's analysed chunks sit and which themes they feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceMapping {
    pub chunk_ids: Vec<String>,
    /// Distinct section headings, first appearance first.
    pub sections: Vec<String>,
    /// Themes this document supports, in report order.
    pub themes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CrossDocumentReport {
    pub documents: Vec<String>,
    pub document_count: usize,
    pub total_chunks: usize,
    /// One-paragraph digest of the findings.
    pub overview: String,
    /// Strongest themes and links, one sentence each.
    pub key_insights: Vec<String>,
    pub insights: Vec<CrossDocumentInsight>,
    pub relationships: Vec<DocumentRelationship>,
    pub source_mapping: BTreeMap<String, SourceMapping>,
}

impl CrossDocumentReport {
    pub fn is_empty(&self) -> bool {
        self.insights.is_empty()
    }

    /// Plain-text rendering for a generation prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.overview.is_empty() {
            out.push_str(&self.overview);
            out.push_str("\n\n");
        }
        out.push_str("Cross-document themes:\n");
        if self.insights.is_empty() {
            out.push_str("- none found across the selected documents\n");
        }
        for insight in &self.insights {
            out.push_str(&format!(
                "- {} (strength {:.0}; in {})\n",
                insight.theme,
                insight.relationship_strength,
                insight.filenames.join(", ")
            ));
        }
        if !self.relationships.is_empty() {
            out.push_str("\nDocument relationships:\n");
            for rel in &self.relationships {
                out.push_str(&format!(
                    "- {} <-> {}: {:.0} ({} shared themes)\n",
                    rel.a, rel.b, rel.strength, rel.shared_themes
                ));
            }
        }
        let sectioned: Vec<(&String, &SourceMapping)> = self
            .source_mapping
            .iter()
            .filter(|(_, m)| !m.sections.is_empty())
            .collect();
        if !sectioned.is_empty() {
            out.push_str("\nSections per document:\n");
            for (filename, mapping) in sectioned {
                out.push_str(&format!("- {}: {}\n", filename, mapping.sections.join("; ")));
            }
        }
        out
    }
}

/// Candidate theme over chunk indices.
struct Theme {
    label: String,
    source: ThemeSource,
    members: BTreeSet<usize>,
    file_count: usize,
    strength: f32,
}

pub struct CrossDocumentAnalyzer {
    config: AnalysisConfig,
}

impl CrossDocumentAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, chunks: &[AnalysisChunk]) -> CrossDocumentReport {
        let documents: BTreeSet<&str> = chunks.iter().map(|c| c.filename.as_str()).collect();
        let documents: Vec<String> = documents.into_iter().map(str::to_string).collect();
        if documents.len() < 2 {
            debug!("Cross-document analysis needs two documents, got {}", documents.len());
            let mut report = CrossDocumentReport {
                document_count: documents.len(),
                total_chunks: chunks.len(),
                source_mapping: source_mapping(chunks, &[]),
                documents,
                ..CrossDocumentReport::default()
            };
            report.overview = overview(&report);
            return report;
        }

        let terms: Vec<Vec<String>> = chunks
            .iter()
            .map(|c| {
                significant_terms(
                    &c.content,
                    self.config.min_term_length,
                    self.config.max_terms_per_chunk,
                )
            })
            .collect();

        let mut themes = self.term_themes(chunks, &terms);
        let term_members: BTreeSet<BTreeSet<usize>> =
            themes.iter().map(|t| t.members.clone()).collect();
        themes.extend(
            self.similarity_themes(chunks, &terms)
                .into_iter()
                .filter(|t| !term_members.contains(&t.members)),
        );

        themes.sort_by(|a, b| {
            b.file_count
                .cmp(&a.file_count)
                .then(b.members.len().cmp(&a.members.len()))
                .then(b.strength.total_cmp(&a.strength))
                .then(a.label.cmp(&b.label))
        });
        themes.truncate(self.config.max_themes);

        let insights: Vec<CrossDocumentInsight> = themes
            .iter()
            .filter_map(|theme| {
                let support: Vec<(&str, &str)> = theme
                    .members
                    .iter()
                    .map(|&i| (chunks[i].chunk_id.as_str(), chunks[i].filename.as_str()))
                    .collect();
                CrossDocumentInsight::new(&theme.label, theme.source, &support, theme.strength)
            })
            .collect();
        let relationships = relationships(&documents, &insights);

        info!(
            "Cross-document analysis: {} documents, {} themes, {} relationships",
            documents.len(),
            insights.len(),
            relationships.len()
        );
        let mut report = CrossDocumentReport {
            document_count: documents.len(),
            total_chunks: chunks.len(),
            source_mapping: source_mapping(chunks, &insights),
            key_insights: key_insights(&insights, &relationships),
            documents,
            insights,
            relationships,
            overview: String::new(),
        };
        report.overview = overview(&report);
        report
    }

    fn term_themes(&self, chunks: &[AnalysisChunk], terms: &[Vec<String>]) -> Vec<Theme> {
        let mut support: BTreeMap<&str, BTreeSet<usize>> = BTreeMap::new();
        for (i, chunk_terms) in terms.iter().enumerate() {
            for term in chunk_terms {
                support.entry(term.as_str()).or_default().insert(i);
            }
        }

        let mut grouped: BTreeMap<BTreeSet<usize>, Vec<&str>> = BTreeMap::new();
        for (term, members) in support {
            grouped.entry(members).or_default().push(term);
        }

        let mut chunks_per_file: HashMap<&str, usize> = HashMap::new();
        for chunk in chunks {
            *chunks_per_file.entry(chunk.filename.as_str()).or_default() += 1;
        }

        grouped
            .into_iter()
            .filter_map(|(members, labels)| {
                let files = files_of(chunks, &members);
                if files.len() < 2 {
                    return None;
                }
                let file_chunks: usize = files.iter().map(|f| chunks_per_file[f]).sum();
                Some(Theme {
                    label: labels.iter().take(3).copied().collect::<Vec<_>>().join(" / "),
                    source: ThemeSource::SharedTerms,
                    strength: 100.0 * members.len() as f32 / file_chunks as f32,
                    file_count: files.len(),
                    members,
                })
            })
            .collect()
    }

    fn similarity_themes(&self, chunks: &[AnalysisChunk], terms: &[Vec<String>]) -> Vec<Theme> {
        let Some((ids, unit)) = self.unit_embeddings(chunks) else {
            return Vec::new();
        };
        let sims = unit.dot(&unit.t());

        let mut clusters = UnionFind::<usize>::new(chunks.len());
        let mut edges: Vec<(usize, usize, f32)> = Vec::new();
        for (a, &i) in ids.iter().enumerate() {
            for (b, &j) in ids.iter().enumerate().skip(a + 1) {
                if chunks[i].filename == chunks[j].filename {
                    continue;
                }
                let sim = sims[[a, b]];
                if sim >= self.config.similarity_threshold {
                    clusters.union(i, j);
                    edges.push((i, j, sim));
                }
            }
        }

        // root -> (members, edge similarities)
        let mut components: BTreeMap<usize, (BTreeSet<usize>, Vec<f32>)> = BTreeMap::new();
        for &(i, j, sim) in &edges {
            let (members, sims) = components.entry(clusters.find(i)).or_default();
            members.insert(i);
            members.insert(j);
            sims.push(sim);
        }

        components
            .into_values()
            .filter_map(|(members, sims)| {
                let files = files_of(chunks, &members);
                if files.len() < 2 {
                    return None;
                }
                let mean = sims.iter().sum::<f32>() / sims.len() as f32;
                Some(Theme {
                    label: cluster_label(&members, terms),
                    source: ThemeSource::SimilarContent,
                    strength: 100.0 * mean,
                    file_count: files.len(),
                    members,
                })
            })
            .collect()
    }
}

impl CrossDocumentAnalyzer {
    /// Chunk indices with a usable embedding and their unit-norm rows. At
    /// most `max_similarity_chunks` chunks take part, spread evenly over
    /// the input so every document keeps a share.
    fn unit_embeddings(&self, chunks: &[AnalysisChunk]) -> Option<(Vec<usize>, Array2<f32>)> {
        let dim = chunks.iter().find_map(|c| c.embedding.as_ref())?.len();
        let mut ids: Vec<usize> = chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.embedding.as_ref().is_some_and(|e| e.len() == dim))
            .map(|(i, _)| i)
            .collect();
        let cap = self.config.max_similarity_chunks;
        if ids.len() > cap {
            debug!("Similarity pass sampling {} of {} chunks", cap, ids.len());
            let step = ids.len() as f32 / cap as f32;
            let sampled: Vec<usize> = (0..cap).map(|k| ids[(k as f32 * step) as usize]).collect();
            ids = sampled;
        }
        if ids.len() < 2 {
            return None;
        }

        let mut unit = Array2::<f32>::zeros((ids.len(), dim));
        for (row, &i) in ids.iter().enumerate() {
            if let Some(embedding) = &chunks[i].embedding {
                let norm = embedding.dot(embedding).sqrt();
                if norm > f32::EPSILON {
                    unit.row_mut(row).assign(&(embedding / norm));
                }
            }
        }
        Some((ids, unit))
    }
}

fn files_of<'a>(chunks: &'a [AnalysisChunk], members: &BTreeSet<usize>) -> BTreeSet<&'a str> {
    members.iter().map(|&i| chunks[i].filename.as_str()).collect()
}

/// Per-document chunk ids, section headings and supported themes.
fn source_mapping(
    chunks: &[AnalysisChunk],
    insights: &[CrossDocumentInsight],
) -> BTreeMap<String, SourceMapping> {
    let mut mapping: BTreeMap<String, SourceMapping> = BTreeMap::new();
    for chunk in chunks {
        let entry = mapping.entry(chunk.filename.clone()).or_default();
        entry.chunk_ids.push(chunk.chunk_id.clone());
        if let Some(section) = &chunk.section {
            if !entry.sections.contains(section) {
                entry.sections.push(section.clone());
            }
        }
    }
    for insight in insights {
        for filename in insight.filenames() {
            if let Some(entry) = mapping.get_mut(filename) {
                entry.themes.push(insight.theme().to_string());
            }
        }
    }
    mapping
}

const MAX_KEY_INSIGHTS: usize = 5;

fn key_insights(insights: &[CrossDocumentInsight], relationships: &[DocumentRelationship]) -> Vec<String> {
    let mut out: Vec<String> = insights
        .iter()
        .take(MAX_KEY_INSIGHTS)
        .map(|i| {
            let basis = match i.source() {
                ThemeSource::SharedTerms => "shared terms",
                ThemeSource::SimilarContent => "closely matching passages",
            };
            format!(
                "\"{}\" appears in {} documents ({}; strength {:.0}): {}",
                i.theme(),
                i.filenames().len(),
                basis,
                i.relationship_strength(),
                i.filenames().join(", ")
            )
        })
        .collect();
    if let Some(rel) = relationships.first() {
        out.push(format!(
            "Strongest link: {} and {} share {} themes (strength {:.0})",
            rel.a, rel.b, rel.shared_themes, rel.strength
        ));
    }
    out
}

fn overview(report: &CrossDocumentReport) -> String {
    let mut text = format!(
        "Analysed {} chunks from {} documents.",
        report.total_chunks, report.document_count
    );
    if report.document_count < 2 {
        text.push_str(" Cross-document themes need at least two documents.");
    } else if report.insights.is_empty() {
        text.push_str(" No theme is supported by more than one document.");
    } else {
        text.push_str(&format!(
            " {} themes span more than one document; {} document pairs are related.",
            report.insights.len(),
            report.relationships.len()
        ));
    }
    text
}

/// The term most members share, else a generic label.
fn cluster_label(members: &BTreeSet<usize>, terms: &[Vec<String>]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for &i in members {
        for term in &terms[i] {
            *counts.entry(term.as_str()).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n >= 2)
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))
        .map(|(term, _)| format!("closely matching passages on {term}"))
        .unwrap_or_else(|| "closely matching passages".to_string())
}

/// Shared theme count per document pair, normalized by the smaller of the
/// two documents' theme counts.
fn relationships(documents: &[String], insights: &[CrossDocumentInsight]) -> Vec<DocumentRelationship> {
    let mut graph: UnGraph<&str, usize> = UnGraph::new_undirected();
    let nodes: HashMap<&str, NodeIndex> = documents
        .iter()
        .map(|d| (d.as_str(), graph.add_node(d.as_str())))
        .collect();
    let mut theme_counts: HashMap<&str, usize> = HashMap::new();

    for insight in insights {
        for (k, a) in insight.filenames.iter().enumerate() {
            *theme_counts.entry(a.as_str()).or_default() += 1;
            for b in &insight.filenames[k + 1..] {
                let (na, nb) = (nodes[a.as_str()], nodes[b.as_str()]);
                match graph.find_edge(na, nb) {
                    Some(edge) => graph[edge] += 1,
                    None => {
                        graph.add_edge(na, nb, 1);
                    }
                }
            }
        }
    }

    let mut out: Vec<DocumentRelationship> = graph
        .edge_indices()
        .filter_map(|edge| {
            let (na, nb) = graph.edge_endpoints(edge)?;
            let (a, b) = (graph[na], graph[nb]);
            let (a, b) = if a <= b { (a, b) } else { (b, a) };
            let shared = graph[edge];
            let base = theme_counts[a].min(theme_counts[b]).max(1);
            Some(DocumentRelationship {
                a: a.to_string(),
                b: b.to_string(),
                shared_themes: shared,
                strength: (100.0 * shared as f32 / base as f32).min(100.0),
            })
        })
        .collect();
    out.sort_by(|x, y| {
        y.strength
            .total_cmp(&x.strength)
            .then_with(|| (&x.a, &x.b).cmp(&(&y.a, &y.b)))
    });
    out
}
