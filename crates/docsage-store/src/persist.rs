//! Save and load a `VectorIndex` as one SQLite file.
//!
//! A save writes a fresh database next to the target inside a single
//! transaction and renames it into place, so readers only ever see the old
//! file or the complete new one.

use std::path::{Path, PathBuf};

use chrono::Utc;
use docsage_core::{Error, Metric, Result};
use ndarray::Array2;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::embedding::{decode_f32_blob, encode_f32_blob};
use crate::index::VectorIndex;
use crate::schema::{
    FORMAT_VERSION, INSERT_ENTRY_SQL, INSERT_MANIFEST_SQL, SCHEMA_SQL, SELECT_ENTRIES_SQL,
    SELECT_MANIFEST_SQL,
};
use crate::types::ChunkMetadata;

pub const INDEX_FILE: &str = "index.db";
pub const SESSION_FILE: &str = "session.json";

/// Header row of a persisted index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub session_id: String,
    pub metric: Metric,
    pub dimension: Option<usize>,
    pub vector_count: usize,
    /// Unix seconds.
    pub saved_at: i64,
}

/// Session bookkeeping stored beside the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    #[serde(default)]
    pub selected_filenames: Vec<String>,
    pub updated_at: i64,
}

pub fn index_path(dir: &Path) -> PathBuf {
    dir.join(INDEX_FILE)
}

pub fn index_exists(dir: &Path) -> bool {
    index_path(dir).is_file()
}

/// Write `index` under `dir`, replacing any previous file.
pub fn save_index(index: &VectorIndex, session_id: &str, dir: &Path) -> Result<IndexManifest> {
    std::fs::create_dir_all(dir)?;
    let target = index_path(dir);
    let tmp = dir.join(format!("{INDEX_FILE}.tmp"));
    if tmp.exists() {
        std::fs::remove_file(&tmp)?;
    }

    let manifest = IndexManifest {
        format_version: FORMAT_VERSION,
        session_id: session_id.to_string(),
        metric: index.metric(),
        dimension: index.dimension(),
        vector_count: index.len(),
        saved_at: Utc::now().timestamp(),
    };

    {
        let mut conn = Connection::open(&tmp).map_err(db_err)?;
        conn.execute_batch(SCHEMA_SQL).map_err(db_err)?;
        conn.pragma_update(None, "user_version", FORMAT_VERSION)
            .map_err(db_err)?;

        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            INSERT_MANIFEST_SQL,
            params![
                manifest.format_version,
                manifest.session_id,
                manifest.metric.as_str(),
                manifest.dimension.map(|d| d as i64),
                manifest.vector_count as i64,
                manifest.saved_at,
            ],
        )
        .map_err(db_err)?;
        {
            let mut stmt = tx.prepare(INSERT_ENTRY_SQL).map_err(db_err)?;
            for (position, (row, meta)) in index
                .vectors()
                .rows()
                .into_iter()
                .zip(index.metadata())
                .enumerate()
            {
                let blob = encode_f32_blob(row.iter());
                let json = serde_json::to_string(meta)?;
                stmt.execute(params![position as i64, blob, json])
                    .map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)?;
    }

    std::fs::rename(&tmp, &target)?;
    info!(
        "Saved index for session {}: {} vectors, dim={:?}, path={}",
        session_id,
        manifest.vector_count,
        manifest.dimension,
        target.display()
    );
    Ok(manifest)
}

/// Read only the manifest row.
pub fn read_manifest(dir: &Path) -> Result<IndexManifest> {
    let conn = open_read_only(dir)?;
    query_manifest(&conn, &index_path(dir))
}

/// Load the index stored under `dir`.
pub fn load_index(dir: &Path) -> Result<(VectorIndex, IndexManifest)> {
    let path = index_path(dir);
    let conn = open_read_only(dir)?;
    let manifest = query_manifest(&conn, &path)?;

    let dim = manifest.dimension.unwrap_or(0);
    let mut flat: Vec<f32> = Vec::with_capacity(manifest.vector_count * dim);
    let mut metadata: Vec<ChunkMetadata> = Vec::with_capacity(manifest.vector_count);

    let mut stmt = conn
        .prepare(SELECT_ENTRIES_SQL)
        .map_err(|e| corrupt(&path, e))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .map_err(|e| corrupt(&path, e))?;

    for (expected, row) in rows.enumerate() {
        let (position, blob, json) = row.map_err(|e| corrupt(&path, e))?;
        if position != expected as i64 {
            return Err(Error::CorruptIndex(format!(
                "{}: entry at position {} where {} was expected",
                path.display(),
                position,
                expected
            )));
        }
        flat.extend(decode_f32_blob(&blob, dim)?);
        let meta: ChunkMetadata = serde_json::from_str(&json).map_err(|e| {
            Error::CorruptIndex(format!("{}: metadata {}: {}", path.display(), position, e))
        })?;
        metadata.push(meta);
    }

    if metadata.len() != manifest.vector_count {
        return Err(Error::CorruptIndex(format!(
            "{}: manifest lists {} vectors, found {}",
            path.display(),
            manifest.vector_count,
            metadata.len()
        )));
    }

    let matrix = Array2::from_shape_vec((metadata.len(), dim), flat)
        .map_err(|e| Error::CorruptIndex(format!("{}: {}", path.display(), e)))?;
    let index = VectorIndex::from_parts(manifest.metric, manifest.dimension, matrix, metadata)?;

    debug!(
        "Loaded index for session {}: {} vectors from {}",
        manifest.session_id,
        index.len(),
        path.display()
    );
    Ok((index, manifest))
}

pub fn save_session_record(dir: &Path, record: &SessionRecord) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let tmp = dir.join(format!("{SESSION_FILE}.tmp"));
    std::fs::write(&tmp, serde_json::to_string_pretty(record)?)?;
    std::fs::rename(&tmp, dir.join(SESSION_FILE))?;
    Ok(())
}

pub fn load_session_record(dir: &Path) -> Result<Option<SessionRecord>> {
    let path = dir.join(SESSION_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)?;
    Ok(Some(serde_json::from_str(&raw)?))
}

fn open_read_only(dir: &Path) -> Result<Connection> {
    let path = index_path(dir);
    if !path.is_file() {
        return Err(Error::IndexNotFound(dir.display().to_string()));
    }
    Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| corrupt(&path, e))
}

fn query_manifest(conn: &Connection, path: &Path) -> Result<IndexManifest> {
    let row = conn
        .query_row(SELECT_MANIFEST_SQL, [], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })
        .optional()
        .map_err(|e| corrupt(path, e))?;

    let (format_version, session_id, metric, dimension, vector_count, saved_at) =
        row.ok_or_else(|| Error::CorruptIndex(format!("{}: missing manifest", path.display())))?;

    if format_version > FORMAT_VERSION {
        return Err(Error::CorruptIndex(format!(
            "{}: format version {} is newer than supported {}",
            path.display(),
            format_version,
            FORMAT_VERSION
        )));
    }

    Ok(IndexManifest {
        format_version,
        session_id,
        metric: metric.parse()?,
        dimension: dimension.map(|d| d as usize),
        vector_count: vector_count as usize,
        saved_at,
    })
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

fn corrupt(path: &Path, e: rusqlite::Error) -> Error {
    Error::CorruptIndex(format!("{}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};
    use tempfile::TempDir;

    fn sample_index(metric: Metric) -> VectorIndex {
        let mut index = VectorIndex::new(metric);
        let vectors: Vec<Array1<f32>> = vec![
            array![0.2, 0.9, 0.1],
            array![0.7, 0.1, 0.3],
            array![0.4, 0.4, 0.8],
            array![0.2, 0.9, 0.1],
        ];
        let metadata = (0..4)
            .map(|i| {
                let mut m = ChunkMetadata::new(
                    format!("s1_chunk_{i}"),
                    "d1",
                    if i % 2 == 0 { "a.pdf" } else { "b.pdf" },
                    format!("content {i}"),
                    i,
                );
                m.page = Some(i as u32 + 1);
                m
            })
            .collect();
        index.add(&vectors, metadata).unwrap();
        index
    }

    fn queries() -> Vec<Array1<f32>> {
        vec![
            array![0.2, 0.9, 0.1],
            array![1.0, 0.0, 0.0],
            array![-0.3, 0.5, 0.9],
        ]
    }

    #[test]
    fn test_save_load_same_results() {
        for metric in [Metric::InnerProduct, Metric::L2] {
            let dir = TempDir::new().unwrap();
            let index = sample_index(metric);
            let manifest = save_index(&index, "s1", dir.path()).unwrap();
            assert_eq!(manifest.vector_count, 4);

            let (loaded, read_back) = load_index(dir.path()).unwrap();
            assert_eq!(read_back, manifest);
            assert_eq!(loaded.metadata(), index.metadata());

            for q in queries() {
                let before = index.search(&q, 4).unwrap();
                let after = loaded.search(&q, 4).unwrap();
                let before: Vec<(usize, f32)> = before.iter().map(|h| (h.position, h.score)).collect();
                let after: Vec<(usize, f32)> = after.iter().map(|h| (h.position, h.score)).collect();
                assert_eq!(before, after);
            }
        }
    }

    #[test]
    fn test_save_overwrites_previous() {
        let dir = TempDir::new().unwrap();
        let mut index = sample_index(Metric::InnerProduct);
        save_index(&index, "s1", dir.path()).unwrap();
        index.clear();
        save_index(&index, "s1", dir.path()).unwrap();

        let (loaded, manifest) = load_index(dir.path()).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(manifest.dimension, Some(3));
        assert_eq!(loaded.dimension(), Some(3));
        assert!(!dir.path().join("index.db.tmp").exists());
    }

    #[test]
    fn test_empty_unsized_index_roundtrips() {
        let dir = TempDir::new().unwrap();
        save_index(&VectorIndex::new(Metric::InnerProduct), "s1", dir.path()).unwrap();
        let (loaded, manifest) = load_index(dir.path()).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(manifest.dimension, None);
    }

    #[test]
    fn test_missing_index() {
        let dir = TempDir::new().unwrap();
        assert!(!index_exists(dir.path()));
        assert!(matches!(load_index(dir.path()), Err(Error::IndexNotFound(_))));
    }

    #[test]
    fn test_garbage_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        std::fs::write(index_path(dir.path()), b"definitely not sqlite").unwrap();
        let err = load_index(dir.path()).unwrap_err();
        assert!(matches!(err, Error::CorruptIndex(_)));
        assert!(err.is_structural());
    }

    #[test]
    fn test_manifest_count_mismatch_is_corrupt() {
        let dir = TempDir::new().unwrap();
        save_index(&sample_index(Metric::InnerProduct), "s1", dir.path()).unwrap();
        {
            let conn = Connection::open(index_path(dir.path())).unwrap();
            conn.execute("DELETE FROM entries WHERE position = 3", []).unwrap();
        }
        assert!(matches!(load_index(dir.path()), Err(Error::CorruptIndex(_))));
    }

    #[test]
    fn test_newer_format_rejected() {
        let dir = TempDir::new().unwrap();
        save_index(&sample_index(Metric::InnerProduct), "s1", dir.path()).unwrap();
        {
            let conn = Connection::open(index_path(dir.path())).unwrap();
            conn.execute("UPDATE manifest SET format_version = 99", []).unwrap();
        }
        assert!(matches!(read_manifest(dir.path()), Err(Error::CorruptIndex(_))));
    }

    #[test]
    fn test_session_record_roundtrip() {
        let dir = TempDir::new().unwrap();
        assert!(load_session_record(dir.path()).unwrap().is_none());
        let record = SessionRecord {
            session_id: "chat-42".into(),
            selected_filenames: vec!["a.pdf".into()],
            updated_at: 1_700_000_000,
        };
        save_session_record(dir.path(), &record).unwrap();
        assert_eq!(load_session_record(dir.path()).unwrap(), Some(record));
    }
}
