//! A session and the one index it owns.
//!
//! `SessionIndex` wraps a `VectorIndex` in a read/write lock: appends, merges,
//! clears and save/load take the write lock, searches take the read lock, so a
//! reader never observes a half-applied batch.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use docsage_core::{Metric, Result};
use ndarray::Array1;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::index::VectorIndex;
use crate::persist::{self, IndexManifest, SessionRecord};
use crate::types::{ChunkMetadata, IndexStats, SearchHit};

pub struct SessionIndex {
    session_id: String,
    dir: PathBuf,
    index: RwLock<VectorIndex>,
}

impl SessionIndex {
    pub fn new(session_id: impl Into<String>, dir: impl Into<PathBuf>, index: VectorIndex) -> Self {
        Self {
            session_id: session_id.into(),
            dir: dir.into(),
            index: RwLock::new(index),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Storage location of this session's persisted index.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn add(&self, vectors: &[Array1<f32>], metadata: Vec<ChunkMetadata>) -> Result<usize> {
        let added = self.index.write().add(vectors, metadata)?;
        debug!("Session {}: appended {} vectors", self.session_id, added);
        Ok(added)
    }

    /// Append unless `document_id` is already indexed. The check and the
    /// append share one write lock. `None` means nothing was added.
    pub fn add_if_absent(
        &self,
        document_id: &str,
        vectors: &[Array1<f32>],
        metadata: Vec<ChunkMetadata>,
    ) -> Result<Option<usize>> {
        let mut index = self.index.write();
        if index.contains_document(document_id) {
            debug!("Session {}: {} already indexed", self.session_id, document_id);
            return Ok(None);
        }
        let added = index.add(vectors, metadata)?;
        debug!("Session {}: appended {} vectors", self.session_id, added);
        Ok(Some(added))
    }

    pub fn contains_document(&self, document_id: &str) -> bool {
        self.index.read().contains_document(document_id)
    }

    pub fn search(&self, query: &Array1<f32>, k: usize) -> Result<Vec<SearchHit>> {
        self.index.read().search(query, k)
    }

    /// Copy every entry of `other` into this index. `other` is snapshotted
    /// under its own read lock first so the two locks are never held together.
    pub fn merge_from(&self, other: &SessionIndex) -> Result<usize> {
        let snapshot = other.index.read().clone();
        self.merge_index(&snapshot)
    }

    pub fn merge_index(&self, other: &VectorIndex) -> Result<usize> {
        let added = self.index.write().merge(other)?;
        info!("Session {}: merged {} vectors", self.session_id, added);
        Ok(added)
    }

    pub fn clear(&self) {
        self.index.write().clear();
        info!("Session {}: index cleared", self.session_id);
    }

    pub fn stats(&self) -> IndexStats {
        self.index.read().stats()
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Run `f` against a consistent view of the index.
    pub fn read<R>(&self, f: impl FnOnce(&VectorIndex) -> R) -> R {
        f(&self.index.read())
    }

    /// Persist to this session's own storage location.
    pub fn save(&self) -> Result<IndexManifest> {
        self.save_to(&self.dir)
    }

    pub fn save_to(&self, dir: &Path) -> Result<IndexManifest> {
        self.save_with(dir, || ()).map(|(manifest, _)| manifest)
    }

    /// Save to `dir`, then run `f` before any writer gets the lock back.
    pub fn save_with<R>(&self, dir: &Path, f: impl FnOnce() -> R) -> Result<(IndexManifest, R)> {
        let guard = self.index.write();
        let manifest = persist::save_index(&guard, &self.session_id, dir)?;
        Ok((manifest, f()))
    }

    /// Replace the in-memory index with the one stored under `dir`.
    pub fn load_from(&self, dir: &Path) -> Result<IndexManifest> {
        let mut guard = self.index.write();
        let (loaded, manifest) = persist::load_index(dir)?;
        *guard = loaded;
        Ok(manifest)
    }
}

/// Session state: the selected documents and the session's index.
pub struct Session {
    index: SessionIndex,
    selected: RwLock<Vec<String>>,
    last_access: Mutex<Instant>,
}

impl Session {
    pub fn new(index: SessionIndex, selected: Vec<String>) -> Self {
        Self {
            index,
            selected: RwLock::new(selected),
            last_access: Mutex::new(Instant::now()),
        }
    }

    /// Fresh session with an empty index.
    pub fn empty(session_id: impl Into<String>, dir: impl Into<PathBuf>, metric: Metric) -> Self {
        Self::with_index(session_id, dir, VectorIndex::new(metric))
    }

    pub fn with_index(session_id: impl Into<String>, dir: impl Into<PathBuf>, index: VectorIndex) -> Self {
        Self::new(SessionIndex::new(session_id, dir, index), Vec::new())
    }

    /// Load a persisted session. Fails with `IndexNotFound` if nothing is stored.
    pub fn load(session_id: impl Into<String>, dir: impl Into<PathBuf>) -> Result<Self> {
        let session_id = session_id.into();
        let dir = dir.into();
        let (index, manifest) = persist::load_index(&dir)?;
        let selected = persist::load_session_record(&dir)?
            .map(|r| r.selected_filenames)
            .unwrap_or_default();
        info!(
            "Loaded session {} ({} vectors, {} selected files)",
            session_id,
            manifest.vector_count,
            selected.len()
        );
        Ok(Self::new(SessionIndex::new(session_id, dir, index), selected))
    }

    pub fn id(&self) -> &str {
        self.index.session_id()
    }

    pub fn index(&self) -> &SessionIndex {
        self.touch();
        &self.index
    }

    pub fn selected_filenames(&self) -> Vec<String> {
        self.selected.read().clone()
    }

    pub fn select(&self, filenames: Vec<String>) {
        self.touch();
        *self.selected.write() = filenames;
    }

    /// Add a filename to the selection unless already present.
    pub fn include(&self, filename: &str) {
        self.touch();
        let mut selected = self.selected.write();
        if !selected.iter().any(|f| f == filename) {
            selected.push(filename.to_string());
        }
    }

    pub fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_access.lock().elapsed()
    }

    /// Save the index and the session record together.
    pub fn persist(&self) -> Result<IndexManifest> {
        self.persist_with(|| ()).map(|(manifest, _)| manifest)
    }

    /// Persist, then run `f` while index writers are still held off.
    pub fn persist_with<R>(&self, f: impl FnOnce() -> R) -> Result<(IndexManifest, R)> {
        let dir = self.index.dir();
        let (manifest, outcome) = self.index.save_with(dir, || {
            persist::save_session_record(
                dir,
                &SessionRecord {
                    session_id: self.id().to_string(),
                    selected_filenames: self.selected_filenames(),
                    updated_at: Utc::now().timestamp(),
                },
            )
            .map(|_| f())
        })?;
        Ok((manifest, outcome?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::TempDir;

    fn meta(i: usize) -> ChunkMetadata {
        ChunkMetadata::new(format!("c{i}"), "d", "a.pdf", "text", i)
    }

    #[test]
    fn test_merge_from_other_session() {
        let dir = TempDir::new().unwrap();
        let a = SessionIndex::new("a", dir.path().join("a"), VectorIndex::new(Metric::InnerProduct));
        let b = SessionIndex::new("b", dir.path().join("b"), VectorIndex::new(Metric::InnerProduct));
        a.add(&[array![1.0, 0.0]], vec![meta(0)]).unwrap();
        b.add(&[array![0.0, 1.0], array![1.0, 1.0]], vec![meta(1), meta(2)]).unwrap();

        assert_eq!(a.merge_from(&b).unwrap(), 2);
        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn test_merge_from_self_doubles() {
        let dir = TempDir::new().unwrap();
        let a = SessionIndex::new("a", dir.path(), VectorIndex::new(Metric::L2));
        a.add(&[array![1.0, 0.0]], vec![meta(0)]).unwrap();
        a.merge_from(&a).unwrap();
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_persist_and_load_session() {
        let dir = TempDir::new().unwrap();
        let session = Session::empty("chat-1", dir.path(), Metric::InnerProduct);
        session.index().add(&[array![0.5, 0.5]], vec![meta(0)]).unwrap();
        session.select(vec!["a.pdf".into()]);
        session.include("a.pdf");
        session.include("b.pdf");
        session.persist().unwrap();

        let loaded = Session::load("chat-1", dir.path()).unwrap();
        assert_eq!(loaded.index().len(), 1);
        assert_eq!(loaded.selected_filenames(), vec!["a.pdf", "b.pdf"]);
    }

    #[test]
    fn test_add_if_absent_skips_known_document() {
        let dir = TempDir::new().unwrap();
        let index = SessionIndex::new("s", dir.path(), VectorIndex::new(Metric::InnerProduct));
        assert_eq!(index.add_if_absent("d", &[array![1.0, 0.0]], vec![meta(0)]).unwrap(), Some(1));
        assert_eq!(index.add_if_absent("d", &[array![0.0, 1.0]], vec![meta(1)]).unwrap(), None);
        assert!(index.contains_document("d"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_load_from_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let index = SessionIndex::new("s", dir.path(), VectorIndex::new(Metric::InnerProduct));
        index.add(&[array![1.0, 0.0]], vec![meta(0)]).unwrap();
        index.save().unwrap();
        index.add(&[array![0.0, 1.0]], vec![meta(1)]).unwrap();
        assert_eq!(index.len(), 2);

        index.load_from(dir.path()).unwrap();
        assert_eq!(index.len(), 1);
    }
}
