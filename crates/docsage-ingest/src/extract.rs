//! Heuristic structure extraction over chunk and document text.
//!
//! Everything here is pure: the same text always yields the same tables,
//! entities, terms and sections, so callers may run it in parallel.

pub mod entities;
pub mod structure;
pub mod tables;
pub mod terms;

use docsage_core::ExtractionConfig;
use serde::{Deserialize, Serialize};

use entities::ExtractedEntity;
use tables::{Table, TableExtractor};

/// Tables and entities found in one chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub tables: Vec<Table>,
    pub entities: Vec<ExtractedEntity>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.entities.is_empty()
    }
}

/// Run table detection and entity extraction on a chunk.
pub fn extract_all(chunk_id: &str, text: &str, config: &ExtractionConfig) -> Extraction {
    Extraction {
        tables: TableExtractor::new(config.clone()).extract(chunk_id, text),
        entities: entities::extract_entities(chunk_id, text),
    }
}
