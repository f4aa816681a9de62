//! Documents and the sources that produce their page text.

use std::path::Path;

use docsage_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Page separator used by text exports of paginated documents.
const FORM_FEED: char = '\u{000C}';

/// One page of extracted text, numbered from 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// An uploaded document. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub pages: Vec<PageText>,
    /// Whether the text came from optical recognition.
    #[serde(default)]
    pub ocr_required: bool,
}

impl Document {
    pub fn new(id: impl Into<String>, filename: impl Into<String>, pages: Vec<String>) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            pages: pages
                .into_iter()
                .enumerate()
                .map(|(i, text)| PageText {
                    number: i as u32 + 1,
                    text,
                })
                .collect(),
            ocr_required: false,
        }
    }

    /// Single-page document.
    pub fn from_text(id: impl Into<String>, filename: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, filename, vec![text.into()])
    }

    pub fn from_extracted(id: impl Into<String>, filename: impl Into<String>, extracted: ExtractedText) -> Self {
        let mut doc = Self::new(id, filename, extracted.pages);
        doc.ocr_required = extracted.ocr_required;
        doc
    }

    /// Concatenation of every page, in order.
    pub fn full_text(&self) -> String {
        self.pages.iter().map(|p| p.text.as_str()).collect()
    }

    pub fn char_len(&self) -> usize {
        self.pages.iter().map(|p| p.text.chars().count()).sum()
    }

    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(|p| p.text.trim().is_empty())
    }
}

/// What a document source hands back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedText {
    pub pages: Vec<String>,
    pub ocr_required: bool,
}

/// Produces ordered page text for a file.
pub trait DocumentSource: Send + Sync {
    fn extract(&self, path: &Path) -> Result<ExtractedText>;

    /// Extract and wrap as a `Document` named after the file.
    fn load(&self, id: &str, path: &Path) -> Result<Document> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::MalformedInput(format!("no filename in {}", path.display())))?;
        Ok(Document::from_extracted(id, filename, self.extract(path)?))
    }
}

/// File types the built-in source recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    PlainText,
    Markdown,
    Csv,
    Tsv,
    Json,
    /// Needs a rendering or optical-recognition collaborator.
    Pdf,
    Image,
    Office,
    Unknown,
}

impl FileType {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "txt" | "text" | "log" => Self::PlainText,
            "md" | "markdown" => Self::Markdown,
            "csv" => Self::Csv,
            "tsv" => Self::Tsv,
            "json" => Self::Json,
            "pdf" => Self::Pdf,
            "jpg" | "jpeg" | "png" | "bmp" | "tif" | "tiff" => Self::Image,
            "doc" | "docx" | "xlsx" | "pptx" => Self::Office,
            _ => Self::Unknown,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        Self::from_extension(path.extension().and_then(|e| e.to_str()).unwrap_or(""))
    }

    pub fn is_text(&self) -> bool {
        matches!(
            self,
            Self::PlainText | Self::Markdown | Self::Csv | Self::Tsv | Self::Json
        )
    }
}

/// Reads text-like files directly. Binary formats come back empty with
/// `ocr_required` set so a recognition collaborator can take over.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDocumentSource;

impl DocumentSource for FileDocumentSource {
    fn extract(&self, path: &Path) -> Result<ExtractedText> {
        let file_type = FileType::from_path(path);
        let pages = match file_type {
            FileType::PlainText | FileType::Markdown | FileType::Json => {
                split_pages(&std::fs::read_to_string(path)?)
            }
            FileType::Csv => vec![delimited_to_rows(&std::fs::read_to_string(path)?, ',')],
            FileType::Tsv => vec![std::fs::read_to_string(path)?],
            FileType::Pdf | FileType::Image | FileType::Office => {
                warn!("{:?} needs an external extractor: {}", file_type, path.display());
                return Ok(ExtractedText {
                    pages: Vec::new(),
                    ocr_required: true,
                });
            }
            FileType::Unknown => {
                let bytes = std::fs::read(path)?;
                match String::from_utf8(bytes) {
                    Ok(text) if !looks_binary(&text) => split_pages(&text),
                    _ => {
                        return Err(Error::MalformedInput(format!(
                            "unsupported binary file: {}",
                            path.display()
                        )))
                    }
                }
            }
        };
        debug!("Extracted {} pages from {}", pages.len(), path.display());
        Ok(ExtractedText {
            pages,
            ocr_required: false,
        })
    }
}

fn split_pages(text: &str) -> Vec<String> {
    text.split(FORM_FEED).map(str::to_string).collect()
}

/// Re-emit comma-separated rows with ` | ` so table detection sees them.
/// Quoted fields keep their commas.
fn delimited_to_rows(text: &str, delimiter: char) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let mut cells = Vec::new();
        let mut cell = String::new();
        let mut quoted = false;
        for ch in line.chars() {
            match ch {
                '"' => quoted = !quoted,
                c if c == delimiter && !quoted => cells.push(std::mem::take(&mut cell)),
                c => cell.push(c),
            }
        }
        cells.push(cell);
        out.push_str(
            &cells
                .iter()
                .map(|c| c.trim())
                .collect::<Vec<_>>()
                .join(" | "),
        );
        out.push('\n');
    }
    out
}

fn looks_binary(text: &str) -> bool {
    let control = text
        .chars()
        .filter(|c| c.is_control() && !matches!(*c, '\n' | '\r' | '\t' | FORM_FEED))
        .count();
    control > text.len() / 10
}
