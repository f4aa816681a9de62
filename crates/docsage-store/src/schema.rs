//! SQLite layout of a persisted session index.
//!
//! One file per session. `manifest` holds a single row describing the index;
//! `entries` holds one row per vector, keyed by insertion position.

/// Bumped whenever the on-disk layout changes incompatibly.
pub const FORMAT_VERSION: u32 = 1;

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS manifest (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    format_version INTEGER NOT NULL,
    session_id TEXT NOT NULL,
    metric TEXT NOT NULL,
    dimension INTEGER,
    vector_count INTEGER NOT NULL,
    saved_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS entries (
    position INTEGER PRIMARY KEY,
    embedding BLOB NOT NULL,
    metadata_json TEXT NOT NULL
);
"#;

pub const INSERT_MANIFEST_SQL: &str = "INSERT INTO manifest \
    (id, format_version, session_id, metric, dimension, vector_count, saved_at) \
    VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)";

pub const INSERT_ENTRY_SQL: &str =
    "INSERT INTO entries (position, embedding, metadata_json) VALUES (?1, ?2, ?3)";

pub const SELECT_MANIFEST_SQL: &str = "SELECT format_version, session_id, metric, dimension, \
    vector_count, saved_at FROM manifest WHERE id = 1";

pub const SELECT_ENTRIES_SQL: &str =
    "SELECT position, embedding, metadata_json FROM entries ORDER BY position";
