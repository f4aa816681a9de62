//! Significant-term extraction for theme detection.
//!
//! Words are lowercased, stopwords dropped, and reduced with a small suffix
//! stripper so that variants such as "payments" and "paying" meet.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{L}[\p{L}'-]*").unwrap());

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "about", "above", "after", "again", "against", "also", "among", "been", "before",
        "being", "below", "between", "both", "could", "does", "doing", "down", "during", "each",
        "every", "from", "further", "have", "having", "here", "into", "itself", "just", "more",
        "most", "must", "much", "only", "other", "over", "same", "shall", "should", "some",
        "such", "than", "that", "their", "them", "then", "there", "these", "they", "this",
        "those", "through", "under", "until", "upon", "very", "were", "what", "when", "where",
        "which", "while", "will", "with", "within", "would", "your", "page", "document",
    ]
    .into_iter()
    .collect()
});

/// (suffix, replacement), longest first.
const SUFFIXES: &[(&str, &str)] = &[
    ("ational", "ate"),
    ("ization", "ize"),
    ("iveness", "ive"),
    ("fulness", "ful"),
    ("ements", "e"),
    ("ement", "e"),
    ("ments", ""),
    ("ment", ""),
    ("ities", "ity"),
    ("ings", ""),
    ("ing", ""),
    ("ies", "y"),
    ("ied", "y"),
    ("sses", "ss"),
    ("ed", ""),
    ("es", "e"),
    ("ly", ""),
    ("s", ""),
];

/// Strip one common English suffix, keeping at least three characters.
pub fn stem(word: &str) -> String {
    let lower = word.to_lowercase();
    if lower.chars().count() <= 4 || lower.ends_with("ss") {
        return lower;
    }
    for (suffix, replacement) in SUFFIXES {
        if let Some(base) = lower.strip_suffix(suffix) {
            if base.chars().count() >= 3 {
                return format!("{base}{replacement}");
            }
        }
    }
    lower
}

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(word)
}

/// Most frequent stemmed terms, ties broken by first occurrence.
pub fn significant_terms(text: &str, min_len: usize, max_terms: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, m) in WORD_RE.find_iter(text).enumerate() {
        let word = m.as_str().trim_matches(|c| c == '\'' || c == '-').to_lowercase();
        if word.chars().count() < min_len || is_stopword(&word) {
            continue;
        }
        counts.entry(stem(&word)).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(term, (count, first))| (term, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.into_iter().take(max_terms).map(|(t, _, _)| t).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stem_variants_meet() {
        assert_eq!(stem("payments"), stem("payment"));
        assert_eq!(stem("deliveries"), "delivery");
        assert_eq!(stem("Scheduling"), "schedul");
        assert_eq!(stem("address"), "address");
        assert_eq!(stem("data"), "data");
    }

    #[test]
    fn test_significant_terms_ranked_by_frequency() {
        let text = "Payment schedule: payments are due monthly. The payment terms \
                    follow the schedule agreed with the supplier.";
        let terms = significant_terms(text, 4, 3);
        assert_eq!(terms, vec!["pay", "schedule", "month"]);
    }

    #[test]
    fn test_stopwords_and_short_words_dropped() {
        let terms = significant_terms("This shall be within the scope of the work.", 4, 10);
        assert_eq!(terms, vec!["scope", "work"]);
    }
}
