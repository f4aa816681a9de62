//! Typed entity extraction with regex matchers.
//!
//! Matchers run in a fixed scan order. A span claimed by an earlier matcher
//! cannot be claimed again, so a URL containing an email or a date inside a
//! reference number is reported once, under the earlier kind. Values are
//! de-duplicated per (kind, value) within one text and reported in order of
//! first appearance.

use std::collections::HashSet;
use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Url,
    Email,
    Date,
    Phone,
    Amount,
    Reference,
    Acronym,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Url,
        EntityKind::Email,
        EntityKind::Date,
        EntityKind::Phone,
        EntityKind::Amount,
        EntityKind::Reference,
        EntityKind::Acronym,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Url => "url",
            EntityKind::Email => "email",
            EntityKind::Date => "date",
            EntityKind::Phone => "phone",
            EntityKind::Amount => "amount",
            EntityKind::Reference => "reference",
            EntityKind::Acronym => "acronym",
        }
    }

    /// Heading used in context digests.
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Url => "Links",
            EntityKind::Email => "Emails",
            EntityKind::Date => "Dates",
            EntityKind::Phone => "Phone numbers",
            EntityKind::Amount => "Amounts",
            EntityKind::Reference => "References",
            EntityKind::Acronym => "Acronyms",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub kind: EntityKind,
    pub value: String,
    pub chunk_id: String,
}

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>"'()\[\]]+"#).unwrap());

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
});

const MONTHS: &str = "(?:Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|June?|July?|Aug(?:ust)?|Sep(?:t(?:ember)?)?|Oct(?:ober)?|Nov(?:ember)?|Dec(?:ember)?)";

static DATE_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // 2024-03-15
        r"\b\d{4}-\d{2}-\d{2}\b".to_string(),
        // 15/03/2024, 3.15.24
        r"\b\d{1,2}[/.-]\d{1,2}[/.-]\d{2,4}\b".to_string(),
        // 15 March 2024, 1st Sept 2024
        format!(r"(?i)\b\d{{1,2}}(?:st|nd|rd|th)?\s+{MONTHS}\.?,?\s+\d{{4}}\b"),
        // March 15, 2024
        format!(r"(?i)\b{MONTHS}\.?\s+\d{{1,2}}(?:st|nd|rd|th)?,?\s+\d{{4}}\b"),
        // March 2024
        format!(r"(?i)\b{MONTHS}\.?\s+\d{{4}}\b"),
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static PHONE_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // +44 20 7946 0958, +1-202-555-0147
        r"\+\d{1,3}[\s.-]?(?:\(\d{1,4}\)[\s.-]?)?\d{1,4}(?:[\s.-]\d{2,4}){1,4}\b",
        // (202) 555-0147
        r"\(\d{3}\)\s?\d{3}[\s.-]\d{4}\b",
        // 202-555-0147, 202.555.0147
        r"\b\d{3}[.-]\d{3}[.-]\d{4}\b",
        // 2025550147
        r"\b\d{10}\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static AMOUNT_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // $1,200.50, € 3.5 million, USD 40K
        r"(?i)(?:[$€£¥₹]|\b(?:USD|EUR|GBP|INR|JPY|CAD|AUD|CHF)\b)\s?\d+(?:,\d{2,3})*(?:\.\d+)?(?:\s?(?:million|billion|thousand|mn|bn|[km])\b)?",
        // 1,200 USD, 45 dollars
        r"(?i)\b\d+(?:,\d{2,3})*(?:\.\d+)?\s?(?:million|billion|thousand)?\s?(?:USD|EUR|GBP|INR|JPY|CAD|AUD|CHF|dollars|euros|pounds|rupees)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Keyword-led identifiers: "Invoice No. INV-2024-001", "PO# 55817".
static REFERENCE_KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:ref(?:erence)?|invoice|po|purchase\s+order|contract|tender|order|case|ticket|id)\b\s*(?:no\.?|number|#|:)?\s*:?\s*([A-Z0-9][A-Z0-9/_-]*\d[A-Z0-9/_-]*)",
    )
    .unwrap()
});

/// Bare prefixed codes: "RFP-2024", "ABC-12345".
static REFERENCE_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]{2,5}-\d{2,}(?:[-/][A-Z0-9]+)*\b").unwrap());

static ACRONYM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z]{2,6}\b").unwrap());

/// Capitalised words that are not acronyms.
static ACRONYM_STOPLIST: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "I", "A", "AM", "PM", "OK", "NO", "ID", "TO", "OF", "IN", "ON", "AT", "BY", "OR", "AN",
        "IS", "IT", "BE", "AS", "WE", "THE", "AND", "FOR", "NOT", "ALL", "ARE", "YOU", "WITH",
        "THIS", "THAT", "FROM", "NOTE", "TOTAL",
    ]
    .into_iter()
    .collect()
});

/// Replace characters that keep patterns from matching consistently.
pub fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .chars()
        .map(|c| match c {
            '\u{00A0}' | '\u{2007}' | '\u{202F}' => ' ',
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2013}' | '\u{2014}' => '-',
            c => c,
        })
        .collect()
}

type Matcher = fn(&str) -> Vec<Range<usize>>;

const PIPELINE: [(EntityKind, Matcher); 7] = [
    (EntityKind::Url, match_urls),
    (EntityKind::Email, match_emails),
    (EntityKind::Date, match_dates),
    (EntityKind::Phone, match_phones),
    (EntityKind::Amount, match_amounts),
    (EntityKind::Reference, match_references),
    (EntityKind::Acronym, match_acronyms),
];

fn all_matches(patterns: &[Regex], text: &str) -> Vec<Range<usize>> {
    patterns
        .iter()
        .flat_map(|re| re.find_iter(text).map(|m| m.range()))
        .collect()
}

fn match_urls(text: &str) -> Vec<Range<usize>> {
    URL_RE
        .find_iter(text)
        .map(|m| {
            let trimmed = m.as_str().trim_end_matches(&['.', ',', ';', ':', '!', '?'][..]);
            m.start()..m.start() + trimmed.len()
        })
        .collect()
}

fn match_emails(text: &str) -> Vec<Range<usize>> {
    EMAIL_RE.find_iter(text).map(|m| m.range()).collect()
}

fn match_dates(text: &str) -> Vec<Range<usize>> {
    all_matches(&DATE_RES, text)
}

fn match_phones(text: &str) -> Vec<Range<usize>> {
    all_matches(&PHONE_RES, text)
}

fn match_amounts(text: &str) -> Vec<Range<usize>> {
    all_matches(&AMOUNT_RES, text)
}

fn match_references(text: &str) -> Vec<Range<usize>> {
    let keyed = REFERENCE_KEYWORD_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.range());
    keyed
        .chain(REFERENCE_CODE_RE.find_iter(text).map(|m| m.range()))
        .collect()
}

fn match_acronyms(text: &str) -> Vec<Range<usize>> {
    ACRONYM_RE
        .find_iter(text)
        .filter(|m| !ACRONYM_STOPLIST.contains(m.as_str()))
        .map(|m| m.range())
        .collect()
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

/// Extract entities from one chunk's text.
pub fn extract_entities(chunk_id: &str, text: &str) -> Vec<ExtractedEntity> {
    let text = normalize_text(text);
    let mut claimed: Vec<Range<usize>> = Vec::new();
    let mut found: Vec<(usize, EntityKind, String)> = Vec::new();
    let mut seen: HashSet<(EntityKind, String)> = HashSet::new();

    for (kind, matcher) in PIPELINE {
        let mut spans = matcher(&text);
        // Earliest first, longest first among equal starts.
        spans.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
        for span in spans {
            if span.is_empty() || claimed.iter().any(|c| overlaps(c, &span)) {
                continue;
            }
            let value = text[span.clone()].trim().to_string();
            claimed.push(span.clone());
            if seen.insert((kind, value.clone())) {
                found.push((span.start, kind, value));
            }
        }
    }

    found.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    found
        .into_iter()
        .map(|(_, kind, value)| ExtractedEntity {
            kind,
            value,
            chunk_id: chunk_id.to_string(),
        })
        .collect()
}
