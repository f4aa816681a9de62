//! Heuristic table detection over plain text.
//!
//! Two layouts are recognised:
//! - delimited: cells separated by a configured delimiter (`|`, tab). A line
//!   starts a table when it holds the delimiter at least twice, or once when
//!   the next line holds it the same number of times.
//! - aligned: cells separated by runs of two or more spaces whose column
//!   positions line up, within `alignment_tolerance`, with the previous line.
//!
//! The first line of a region is the header. A row whose cell count differs
//! from the header by more than `column_tolerance` ends the region; a row
//! within tolerance is padded or has its overflow folded into the last cell,
//! and the table is marked `Confidence::Low`. Tables that touch with no
//! separating line are also marked low confidence.

use docsage_core::ExtractionConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableLayout {
    Delimited { delimiter: char },
    Aligned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    /// Best effort: rows were fitted or the region boundary was unclear.
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub table_id: String,
    pub chunk_id: String,
    pub layout: TableLayout,
    pub headers: Vec<String>,
    /// Every row has exactly `headers.len()` cells.
    pub rows: Vec<Vec<String>>,
    pub confidence: Confidence,
    /// Line range within the source text, end exclusive.
    pub line_start: usize,
    pub line_end: usize,
}

impl Table {
    /// (rows, columns), header excluded.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.rows.len(), self.headers.len())
    }

    pub fn is_low_confidence(&self) -> bool {
        self.confidence == Confidence::Low
    }

    /// Normalized pipe-table rendering.
    pub fn to_markdown(&self) -> String {
        let render = |cells: &[String]| {
            let escaped: Vec<String> = cells.iter().map(|c| c.replace('|', "\\|")).collect();
            format!("| {} |", escaped.join(" | "))
        };
        let mut out = Vec::with_capacity(self.rows.len() + 2);
        out.push(render(&self.headers));
        out.push(format!("|{}", " --- |".repeat(self.headers.len())));
        for row in &self.rows {
            out.push(render(row));
        }
        out.join("\n")
    }
}

/// One detected region before ids are assigned.
struct Region {
    layout: TableLayout,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    fitted: bool,
    start: usize,
    end: usize,
}

/// Cell text with its start and end columns (in characters).
#[derive(Debug, Clone, PartialEq)]
struct AlignedCell {
    start: usize,
    end: usize,
    text: String,
}

static ALIGNED_CELL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S+(?: \S+)*").unwrap());

pub struct TableExtractor {
    config: ExtractionConfig,
}

impl TableExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    pub fn extract(&self, chunk_id: &str, text: &str) -> Vec<Table> {
        let lines: Vec<&str> = text.lines().collect();
        let mut regions = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            match self
                .delimited_region(&lines, i)
                .or_else(|| self.aligned_region(&lines, i))
            {
                Some(region) => {
                    i = region.end;
                    regions.push(region);
                }
                None => i += 1,
            }
        }

        let touching: Vec<bool> = (0..regions.len())
            .map(|k| {
                let after_prev = k > 0 && regions[k - 1].end == regions[k].start;
                let before_next = k + 1 < regions.len() && regions[k].end == regions[k + 1].start;
                after_prev || before_next
            })
            .collect();

        regions
            .into_iter()
            .zip(touching)
            .enumerate()
            .map(|(n, (region, touching))| Table {
                table_id: format!("{chunk_id}_table_{n}"),
                chunk_id: chunk_id.to_string(),
                layout: region.layout,
                headers: region.headers,
                rows: region.rows,
                confidence: if region.fitted || touching {
                    Confidence::Low
                } else {
                    Confidence::High
                },
                line_start: region.start,
                line_end: region.end,
            })
            .collect()
    }

    fn delimited_region(&self, lines: &[&str], i: usize) -> Option<Region> {
        let line = lines[i];
        let delimiter = self.config.delimiters.iter().copied().find(|d| line.contains(*d))?;
        if is_separator_row(line, delimiter) {
            return None;
        }
        let headers = split_cells(line, delimiter);
        if headers.len() < 2 || headers.iter().all(|c| c.is_empty()) {
            return None;
        }

        let count = line.matches(delimiter).count();
        let next_consistent = lines
            .get(i + 1)
            .map(|next| next.matches(delimiter).count() == count)
            .unwrap_or(false);
        if count < 2 && !next_consistent {
            return None;
        }

        let mut rows = Vec::new();
        let mut fitted = false;
        let mut j = i + 1;
        while j < lines.len() {
            let row_line = lines[j];
            if row_line.trim().is_empty() || !row_line.contains(delimiter) {
                break;
            }
            if is_separator_row(row_line, delimiter) {
                j += 1;
                continue;
            }
            let cells = split_cells(row_line, delimiter);
            let diff = cells.len().abs_diff(headers.len());
            if diff > self.config.column_tolerance {
                break;
            }
            if diff > 0 {
                fitted = true;
            }
            rows.push(fit_row(cells, headers.len(), &delimiter.to_string()));
            j += 1;
        }

        if rows.is_empty() {
            return None;
        }
        Some(Region {
            layout: TableLayout::Delimited { delimiter },
            headers,
            rows,
            fitted,
            start: i,
            end: j,
        })
    }

    fn aligned_region(&self, lines: &[&str], i: usize) -> Option<Region> {
        let line = lines[i];
        if line.trim().chars().count() < self.config.min_aligned_line_len {
            return None;
        }
        let header_cells = aligned_cells(line)?;
        let first_row = aligned_cells(lines.get(i + 1)?)?;
        if !self.aligns(&header_cells, &first_row) {
            return None;
        }

        let headers: Vec<String> = header_cells.iter().map(|c| c.text.clone()).collect();
        let mut rows = Vec::new();
        let mut fitted = false;
        let mut prev = header_cells;
        let mut j = i + 1;
        while j < lines.len() {
            let cells = match aligned_cells(lines[j]) {
                Some(cells) => cells,
                None => break,
            };
            let diff = cells.len().abs_diff(headers.len());
            if diff > self.config.column_tolerance || !self.aligns(&prev, &cells) {
                break;
            }
            if diff > 0 {
                fitted = true;
            }
            rows.push(fit_row(
                cells.iter().map(|c| c.text.clone()).collect(),
                headers.len(),
                " ",
            ));
            prev = cells;
            j += 1;
        }

        Some(Region {
            layout: TableLayout::Aligned,
            headers,
            rows,
            fitted,
            start: i,
            end: j,
        })
    }

    /// Shared columns start or end within tolerance of each other.
    fn aligns(&self, prev: &[AlignedCell], cur: &[AlignedCell]) -> bool {
        let tol = self.config.alignment_tolerance;
        prev.len().abs_diff(cur.len()) <= self.config.column_tolerance
            && prev
                .iter()
                .zip(cur)
                .all(|(a, b)| a.start.abs_diff(b.start) <= tol || a.end.abs_diff(b.end) <= tol)
    }
}

fn split_cells(line: &str, delimiter: char) -> Vec<String> {
    let trimmed = line.trim_matches(|c: char| c == ' ' || c == '\r');
    let inner = trimmed.strip_prefix(delimiter).unwrap_or(trimmed);
    let inner = inner.strip_suffix(delimiter).unwrap_or(inner);
    inner.split(delimiter).map(|c| c.trim().to_string()).collect()
}

/// Markdown rule lines such as `|---|:---:|`.
fn is_separator_row(line: &str, delimiter: char) -> bool {
    let cells = split_cells(line, delimiter);
    line.contains('-')
        && cells.iter().all(|c| {
            !c.is_empty() && c.chars().all(|ch| matches!(ch, '-' | ':' | '=' | ' '))
        })
}

/// Two or more cells separated by runs of at least two spaces or a tab.
fn aligned_cells(line: &str) -> Option<Vec<AlignedCell>> {
    if line.trim().is_empty() {
        return None;
    }
    let expanded = line.replace('\t', "    ");
    let cells: Vec<AlignedCell> = ALIGNED_CELL_RE
        .find_iter(&expanded)
        .map(|m| {
            let start = expanded[..m.start()].chars().count();
            AlignedCell {
                start,
                end: start + m.as_str().chars().count(),
                text: m.as_str().to_string(),
            }
        })
        .collect();
    (cells.len() >= 2).then_some(cells)
}

/// Pad short rows; fold overflow cells into the last column.
fn fit_row(mut cells: Vec<String>, width: usize, joiner: &str) -> Vec<String> {
    if cells.len() > width && width > 0 {
        let overflow = cells.split_off(width - 1);
        cells.push(overflow.join(joiner));
    }
    cells.resize(width, String::new());
    cells
}
