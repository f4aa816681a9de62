//! Session registry: the arena that owns every resident session.
//!
//! Session ids are opaque. Each session is stored under
//! `root/<sha256(session_id)>/` so ids never need to be valid path segments.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use docsage_core::{Error, IndexConfig, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::index::VectorIndex;
use crate::persist::{self, IndexManifest};
use crate::session::Session;

pub struct SessionRegistry {
    root: PathBuf,
    config: IndexConfig,
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new(root: impl AsRef<Path>, config: IndexConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| Error::Storage(e.to_string()))?;
        Ok(Self {
            root,
            config,
            sessions: DashMap::new(),
        })
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_key(session_id))
    }

    /// Resident session, if any. Never touches disk.
    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|s| Arc::clone(s.value()))
    }

    /// Resident or persisted session; `IndexNotFound` when neither exists.
    pub fn open(&self, session_id: &str) -> Result<Arc<Session>> {
        if let Some(session) = self.get(session_id) {
            return Ok(session);
        }
        let dir = self.session_dir(session_id);
        if !persist::index_exists(&dir) {
            return Err(Error::IndexNotFound(session_id.to_string()));
        }
        let loaded = Arc::new(Session::load(session_id, dir)?);
        Ok(self.insert_if_absent(session_id, loaded))
    }

    /// Resident, persisted, or a new empty session.
    pub fn get_or_create(&self, session_id: &str) -> Result<Arc<Session>> {
        match self.open(session_id) {
            Ok(session) => Ok(session),
            Err(Error::IndexNotFound(_)) => {
                let fresh = Arc::new(Session::with_index(
                    session_id,
                    self.session_dir(session_id),
                    VectorIndex::with_dimension(self.config.metric, self.config.dimension),
                ));
                info!("Created session {}", session_id);
                Ok(self.insert_if_absent(session_id, fresh))
            }
            Err(e) => Err(e),
        }
    }

    pub fn persist(&self, session_id: &str) -> Result<IndexManifest> {
        let session = self
            .get(session_id)
            .ok_or_else(|| Error::NotFound(format!("session {session_id} is not resident")))?;
        session.persist()
    }

    /// Persist every resident session. Returns how many were written.
    pub fn persist_all(&self) -> Result<usize> {
        let sessions: Vec<Arc<Session>> = self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        for session in &sessions {
            session.persist()?;
        }
        Ok(sessions.len())
    }

    /// Drop from memory without touching disk.
    pub fn unload(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Drop from memory and delete persisted data.
    pub fn remove(&self, session_id: &str) -> Result<bool> {
        let resident = self.unload(session_id);
        let dir = self.session_dir(session_id);
        let persisted = dir.exists();
        if persisted {
            std::fs::remove_dir_all(&dir)?;
        }
        if resident || persisted {
            info!("Removed session {}", session_id);
        }
        Ok(resident || persisted)
    }

    /// Ids of resident and persisted sessions, sorted.
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for entry in std::fs::read_dir(&self.root)? {
            let dir = entry?.path();
            if !persist::index_exists(&dir) {
                continue;
            }
            match persist::read_manifest(&dir) {
                Ok(manifest) => ids.push(manifest.session_id),
                Err(e) => warn!("Skipping unreadable session at {}: {}", dir.display(), e),
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Persist and unload sessions idle for at least `idle`.
    ///
    /// Each session is saved and unloaded under its index write lock. A
    /// session someone else still holds a handle to stays resident, so a
    /// write through that handle always lands in an index that gets saved.
    pub fn evict_idle(&self, idle: Duration) -> Result<usize> {
        let stale: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .filter(|e| e.value().idle_for() >= idle)
            .map(|e| Arc::clone(e.value()))
            .collect();
        let mut evicted = 0;
        for session in stale {
            let (_, removed) = session.persist_with(|| {
                // Held here and by the map: no other handle exists.
                self.sessions
                    .remove_if(session.id(), |_, resident| {
                        Arc::ptr_eq(resident, &session) && Arc::strong_count(resident) == 2
                    })
                    .is_some()
            })?;
            if removed {
                evicted += 1;
            } else {
                debug!("Session {} is in use; kept resident", session.id());
            }
        }
        if evicted > 0 {
            info!("Evicted {} idle sessions", evicted);
        }
        Ok(evicted)
    }

    pub fn resident_count(&self) -> usize {
        self.sessions.len()
    }

    fn insert_if_absent(&self, session_id: &str, session: Arc<Session>) -> Arc<Session> {
        let entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert(session);
        Arc::clone(entry.value())
    }
}

fn session_key(session_id: &str) -> String {
    hex::encode(Sha256::digest(session_id.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkMetadata;
    use ndarray::array;
    use tempfile::TempDir;

    fn test_registry() -> (SessionRegistry, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = IndexConfig {
            dimension: 2,
            ..IndexConfig::default()
        };
        let registry = SessionRegistry::new(dir.path().join("sessions"), config).unwrap();
        (registry, dir)
    }

    fn meta(i: usize) -> ChunkMetadata {
        ChunkMetadata::new(format!("c{i}"), "d", "a.pdf", "text", i)
    }

    #[test]
    fn test_open_unknown_session() {
        let (registry, _dir) = test_registry();
        assert!(matches!(registry.open("nope"), Err(Error::IndexNotFound(_))));
    }

    #[test]
    fn test_sessions_are_isolated() {
        let (registry, _dir) = test_registry();
        let a = registry.get_or_create("user/a").unwrap();
        let b = registry.get_or_create("user/b").unwrap();
        a.index().add(&[array![1.0, 0.0]], vec![meta(0)]).unwrap();
        assert_eq!(a.index().len(), 1);
        assert_eq!(b.index().len(), 0);
        assert!(Arc::ptr_eq(&a, &registry.get_or_create("user/a").unwrap()));
    }

    #[test]
    fn test_reopen_after_unload() {
        let (registry, _dir) = test_registry();
        let session = registry.get_or_create("chat 7").unwrap();
        session.index().add(&[array![1.0, 2.0]], vec![meta(0)]).unwrap();
        session.select(vec!["a.pdf".into()]);
        registry.persist("chat 7").unwrap();
        assert!(registry.unload("chat 7"));

        let reopened = registry.open("chat 7").unwrap();
        assert_eq!(reopened.index().len(), 1);
        assert_eq!(reopened.selected_filenames(), vec!["a.pdf"]);
    }

    #[test]
    fn test_list_and_remove() {
        let (registry, _dir) = test_registry();
        registry.get_or_create("b").unwrap();
        registry.get_or_create("a").unwrap();
        registry.persist("a").unwrap();
        registry.unload("a");

        assert_eq!(registry.list_sessions().unwrap(), vec!["a", "b"]);
        assert!(registry.remove("a").unwrap());
        assert!(!registry.remove("a").unwrap());
        assert_eq!(registry.list_sessions().unwrap(), vec!["b"]);
    }

    #[test]
    fn test_evict_idle_persists_first() {
        let (registry, _dir) = test_registry();
        let session = registry.get_or_create("idle").unwrap();
        session.index().add(&[array![1.0, 0.5]], vec![meta(0)]).unwrap();
        drop(session);

        assert_eq!(registry.evict_idle(Duration::ZERO).unwrap(), 1);
        assert_eq!(registry.resident_count(), 0);
        assert_eq!(registry.open("idle").unwrap().index().len(), 1);
    }

    #[test]
    fn test_evict_idle_keeps_sessions_in_use() {
        let (registry, _dir) = test_registry();
        let held = registry.get_or_create("busy").unwrap();

        assert_eq!(registry.evict_idle(Duration::ZERO).unwrap(), 0);
        assert!(Arc::ptr_eq(&held, &registry.get("busy").unwrap()));
        held.index().add(&[array![0.0, 1.0]], vec![meta(0)]).unwrap();
        drop(held);

        assert_eq!(registry.evict_idle(Duration::ZERO).unwrap(), 1);
        assert_eq!(registry.open("busy").unwrap().index().len(), 1);
    }

    #[test]
    fn test_new_sessions_use_configured_dimension() {
        let (registry, _dir) = test_registry();
        let session = registry.get_or_create("dim").unwrap();
        assert_eq!(session.index().read(|idx| idx.dimension()), Some(2));
        let err = session.index().add(&[array![1.0, 2.0, 3.0]], vec![meta(0)]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }
}
