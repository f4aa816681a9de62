//! Saved per-file and combined summaries.
//!
//! Each summary is a pair of files under `summaries/<session key>/`:
//! `<name>_summary.txt` with the text and `<name>_summary.json` with its
//! metadata. Sessions never see each other's summaries.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use docsage_core::Result;
use docsage_ingest::content_hash;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const TEXT_SUFFIX: &str = "_summary.txt";
const META_SUFFIX: &str = "_summary.json";
/// Longest stem list kept in a combined summary's name.
const MAX_COMBINED_NAME: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryKind {
    File,
    Combined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryMetadata {
    pub name: String,
    pub kind: SummaryKind,
    pub source_files: Vec<String>,
    pub model: String,
    /// Characters of summary text.
    pub length: usize,
    #[serde(default)]
    pub chunk_count: usize,
    #[serde(default)]
    pub table_count: usize,
    /// Exhaustive retrieval came back empty and top-k stood in.
    #[serde(default)]
    pub fell_back: bool,
    pub created_at: DateTime<Utc>,
}

impl SummaryMetadata {
    pub fn new(name: impl Into<String>, kind: SummaryKind, source_files: Vec<String>, model: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            source_files,
            model: model.to_string(),
            length: 0,
            chunk_count: 0,
            table_count: 0,
            fell_back: false,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedSummary {
    pub text: String,
    pub metadata: SummaryMetadata,
}

pub struct SummaryStore {
    root: PathBuf,
}

impl SummaryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Name for the combination of `filenames`: their stems joined by `_`,
    /// capped in length.
    pub fn combined_name(filenames: &[String]) -> String {
        let stems: Vec<&str> = filenames
            .iter()
            .map(|f| Path::new(f).file_stem().and_then(|s| s.to_str()).unwrap_or(f))
            .collect();
        let joined: String = stems.join("_").chars().take(MAX_COMBINED_NAME).collect();
        format!("combined_{joined}")
    }

    /// Write the text and metadata, replacing anything saved under the same
    /// name. `length` is filled in from the text.
    pub fn save(&self, session_id: &str, text: &str, mut metadata: SummaryMetadata) -> Result<SavedSummary> {
        let dir = self.session_dir(session_id);
        std::fs::create_dir_all(&dir)?;
        metadata.length = text.chars().count();

        let base = file_base(&metadata.name);
        std::fs::write(dir.join(format!("{base}{TEXT_SUFFIX}")), text)?;
        std::fs::write(
            dir.join(format!("{base}{META_SUFFIX}")),
            serde_json::to_string_pretty(&metadata)?,
        )?;
        info!(
            "Saved {:?} summary {} ({} chars) for session {}",
            metadata.kind, metadata.name, metadata.length, session_id
        );
        Ok(SavedSummary {
            text: text.to_string(),
            metadata,
        })
    }

    /// `None` when nothing (or only half a pair) is saved under `name`.
    pub fn load(&self, session_id: &str, name: &str) -> Result<Option<SavedSummary>> {
        let dir = self.session_dir(session_id);
        let base = file_base(name);
        let text_path = dir.join(format!("{base}{TEXT_SUFFIX}"));
        let meta_path = dir.join(format!("{base}{META_SUFFIX}"));
        if !text_path.exists() || !meta_path.exists() {
            debug!("No saved summary {} in session {}", name, session_id);
            return Ok(None);
        }
        let text = std::fs::read_to_string(text_path)?;
        let metadata: SummaryMetadata = serde_json::from_str(&std::fs::read_to_string(meta_path)?)?;
        Ok(Some(SavedSummary { text, metadata }))
    }

    /// Metadata of every saved summary in the session, newest first.
    pub fn list(&self, session_id: &str) -> Result<Vec<SummaryMetadata>> {
        let dir = self.session_dir(session_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_meta = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(META_SUFFIX));
            if !is_meta {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(docsage_core::Error::from)
                .and_then(|raw| Ok(serde_json::from_str::<SummaryMetadata>(&raw)?))
            {
                Ok(meta) => out.push(meta),
                Err(e) => warn!("Skipping unreadable summary {}: {}", path.display(), e),
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.name.cmp(&b.name)));
        Ok(out)
    }

    pub fn remove_session(&self, session_id: &str) -> Result<()> {
        let dir = self.session_dir(session_id);
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(content_hash(session_id))
    }
}

/// Filesystem-safe form of a summary name.
fn file_base(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
