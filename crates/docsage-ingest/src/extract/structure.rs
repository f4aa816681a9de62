//! Document structure analysis.
//!
//! Headings are recognised line by line: markdown `#` headings, numbered or
//! roman-numbered titles (`3. Budget`, `IV) Terms`), short all-caps lines and
//! short title lines ending in a colon. Each heading opens a section that
//! runs to the next heading. Offsets are character offsets into the text the
//! analysis ran on, the same space chunk offsets live in.
//!
//! The rest is coarse: a document type picked by keyword frequency, the
//! layout elements present, a quality grade from sentence length and a
//! scanned-text guess from stray single-letter tokens.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Longest line still considered a heading.
const MAX_HEADING_CHARS: usize = 80;
const MAX_HEADING_WORDS: usize = 8;

/// Below this many words the scanned-text guess is not attempted.
const MIN_WORDS_FOR_SCAN_CHECK: usize = 20;
const STRAY_LETTER_RATIO: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Overview,
    Instructions,
    Requirements,
    Technical,
    Timeline,
    Financial,
    Terms,
    Compliance,
    Contacts,
    Data,
    Findings,
    Recommendations,
    Other,
}

/// Heading keywords per kind, tried in order. The first kind with a keyword
/// among the heading's words wins.
const SECTION_KEYWORDS: &[(SectionKind, &[&str])] = &[
    (SectionKind::Overview, &["overview", "introduction", "summary", "background", "purpose", "scope"]),
    (SectionKind::Instructions, &["instruction", "instructions", "procedure", "process", "steps", "guidelines", "how"]),
    (SectionKind::Requirements, &["requirement", "requirements", "specification", "specifications", "eligibility"]),
    (SectionKind::Technical, &["technical", "architecture", "system", "design", "technology"]),
    (SectionKind::Timeline, &["timeline", "schedule", "milestone", "milestones", "deadline", "deadlines", "phases"]),
    (SectionKind::Financial, &["budget", "financial", "cost", "costs", "pricing", "payment", "fees", "price"]),
    (SectionKind::Terms, &["terms", "conditions", "clauses", "agreement", "legal", "liability", "warranty"]),
    (SectionKind::Compliance, &["compliance", "standards", "certification", "certifications", "regulations"]),
    (SectionKind::Contacts, &["contact", "contacts", "stakeholders", "parties", "team"]),
    (SectionKind::Data, &["data", "tables", "figures", "appendix", "attachment", "annex"]),
    (SectionKind::Findings, &["findings", "results", "conclusion", "conclusions", "outcomes"]),
    (SectionKind::Recommendations, &["recommendation", "recommendations", "next", "actions"]),
];

impl SectionKind {
    /// Kind named by a heading's words.
    pub fn classify(heading: &str) -> Self {
        let words: Vec<String> = heading
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();
        SECTION_KEYWORDS
            .iter()
            .find(|(_, keywords)| words.iter().any(|w| keywords.contains(&w.as_str())))
            .map(|(kind, _)| *kind)
            .unwrap_or(SectionKind::Other)
    }
}

/// A heading and the text it governs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub kind: SectionKind,
    /// Heading text without numbering, `#` marks or a trailing colon.
    pub heading: String,
    /// Offset of the heading line.
    pub char_start: usize,
    /// Offset of the next heading, or the end of the text.
    pub char_end: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Specification,
    Proposal,
    Contract,
    Manual,
    Report,
    Policy,
    Invoice,
    Form,
    #[default]
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureElement {
    NumberedSections,
    LetteredSections,
    BulletPoints,
    DashedLists,
    Tables,
    References,
    NumberedTables,
    NumberedFigures,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentQuality {
    #[default]
    Poor,
    Fair,
    Good,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentStructure {
    pub document_type: DocumentType,
    /// In document order, non-overlapping.
    pub sections: Vec<Section>,
    pub elements: Vec<StructureElement>,
    pub quality: ContentQuality,
    /// The text reads like OCR output.
    pub likely_scanned: bool,
}

impl DocumentStructure {
    /// Section containing the character at `offset`.
    pub fn section_at(&self, offset: usize) -> Option<&Section> {
        let idx = self.sections.partition_point(|s| s.char_start <= offset);
        let section = self.sections.get(idx.checked_sub(1)?)?;
        (offset < section.char_end).then_some(section)
    }

    pub fn headings(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.heading.as_str()).collect()
    }

    pub fn has(&self, element: StructureElement) -> bool {
        self.elements.contains(&element)
    }
}

static MARKDOWN_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s+(\S.*)$").unwrap());
static NUMBERED_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\d{1,2}(?:\.\d{1,2})*|[IVXLC]{1,5})[.)]\s+(\S.*)$").unwrap());

static DOCUMENT_TYPES: Lazy<Vec<(DocumentType, Regex)>> = Lazy::new(|| {
    [
        (DocumentType::Specification, r"\b(?:specifications?|technical spec|requirements specification)\b"),
        (DocumentType::Proposal, r"\b(?:proposals?|bids?|tenders?|proposed solution)\b"),
        (DocumentType::Contract, r"\b(?:contracts?|agreements?|terms and conditions)\b"),
        (DocumentType::Manual, r"\b(?:manuals?|handbooks?|user guide|instructions)\b"),
        (DocumentType::Report, r"\b(?:reports?|findings|executive summary)\b"),
        (DocumentType::Policy, r"\b(?:polic(?:y|ies)|standard operating procedure|guidelines)\b"),
        (DocumentType::Invoice, r"\b(?:invoices?|receipts?|payment request)\b"),
        (DocumentType::Form, r"\b(?:forms?|application|questionnaires?)\b"),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).unwrap()))
    .collect()
});

static ELEMENTS: Lazy<Vec<(StructureElement, Regex)>> = Lazy::new(|| {
    [
        (StructureElement::NumberedSections, r"(?m)^\s*\d{1,2}\.\s+\S"),
        (StructureElement::LetteredSections, r"(?m)^\s*[A-Z]\.\s+\S"),
        (StructureElement::BulletPoints, r"(?m)^\s*[•*]\s+\S"),
        (StructureElement::DashedLists, r"(?m)^\s*-\s+\S"),
        (StructureElement::Tables, r"(?m)^.*\|.*\|.*$"),
        (StructureElement::References, r"\[\d+\]"),
        (StructureElement::NumberedTables, r"(?i)\btable\s+\d+"),
        (StructureElement::NumberedFigures, r"(?i)\bfigure\s+\d+"),
    ]
    .into_iter()
    .map(|(element, pattern)| (element, Regex::new(pattern).unwrap()))
    .collect()
});

pub fn analyze_structure(text: &str) -> DocumentStructure {
    DocumentStructure {
        document_type: document_type(text),
        sections: sections(text),
        elements: ELEMENTS
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(element, _)| *element)
            .collect(),
        quality: content_quality(text),
        likely_scanned: likely_scanned(text),
    }
}

/// Heading text if `line` looks like one.
pub fn heading_text(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.chars().count() > MAX_HEADING_CHARS || line.contains(['|', '\t']) {
        return None;
    }
    let title = if let Some(c) = MARKDOWN_HEADING.captures(line) {
        c[1].to_string()
    } else if let Some(c) = NUMBERED_HEADING.captures(line) {
        let title = c[1].trim();
        if title.ends_with(['.', ';', ',']) || !title.starts_with(char::is_uppercase) {
            return None;
        }
        title.to_string()
    } else if is_caps_line(line) || is_colon_title(line) {
        line.to_string()
    } else {
        return None;
    };
    let title = title.trim().trim_end_matches(':').trim().to_string();
    let words = title.split_whitespace().count();
    (words > 0 && words <= MAX_HEADING_WORDS).then_some(title)
}

fn is_caps_line(line: &str) -> bool {
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    let visible = line.chars().filter(|c| !c.is_whitespace()).count();
    letters.len() >= 3 && letters.len() * 5 >= visible * 3 && letters.iter().all(|c| c.is_uppercase())
}

fn is_colon_title(line: &str) -> bool {
    line.ends_with(':')
        && line.starts_with(char::is_uppercase)
        && line.split_whitespace().count() <= 5
}

fn sections(text: &str) -> Vec<Section> {
    let mut found: Vec<(usize, String)> = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if let Some(heading) = heading_text(line) {
            found.push((offset, heading));
        }
        offset += line.chars().count();
    }

    let mut sections = Vec::with_capacity(found.len());
    for (i, (start, heading)) in found.iter().enumerate() {
        let end = found.get(i + 1).map(|(next, _)| *next).unwrap_or(offset);
        sections.push(Section {
            kind: SectionKind::classify(heading),
            heading: heading.clone(),
            char_start: *start,
            char_end: end,
        });
    }
    sections
}

/// Most frequent type keyword wins; ties go to the earlier type.
fn document_type(text: &str) -> DocumentType {
    let lower = text.to_lowercase();
    let mut best = (DocumentType::General, 0);
    for (kind, re) in DOCUMENT_TYPES.iter() {
        let score = re.find_iter(&lower).count();
        if score > best.1 {
            best = (*kind, score);
        }
    }
    best.0
}

fn content_quality(text: &str) -> ContentQuality {
    if text.trim().chars().count() < 100 {
        return ContentQuality::Poor;
    }
    let sentences: Vec<usize> = text
        .split(['.', '!', '?'])
        .map(|s| s.split_whitespace().count())
        .filter(|&n| n > 0)
        .collect();
    if sentences.is_empty() {
        return ContentQuality::Poor;
    }
    let mean = sentences.iter().sum::<usize>() as f32 / sentences.len() as f32;
    if mean < 3.0 {
        ContentQuality::Poor
    } else if mean < 8.0 {
        ContentQuality::Fair
    } else {
        ContentQuality::Good
    }
}

/// Stray single letters other than "a" and "I" are a typical OCR artifact.
fn likely_scanned(text: &str) -> bool {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < MIN_WORDS_FOR_SCAN_CHECK {
        return false;
    }
    let stray = words
        .iter()
        .filter(|w| {
            let mut chars = w.chars();
            matches!((chars.next(), chars.next()), (Some(c), None) if c.is_alphabetic() && !matches!(c, 'a' | 'A' | 'I'))
        })
        .count();
    stray as f32 / words.len() as f32 >= STRAY_LETTER_RATIO
}
