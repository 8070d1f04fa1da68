//! Record persistence behind a narrow storage seam.
//!
//! Governed record operations (save/create/update/delete) run inside a
//! per-flow transaction envelope: the store snapshots its records when a
//! flow starts, commits to the backend on success, and rolls back to the
//! snapshot on failure. Records match by their `id` field when present.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::EngineError;

pub type Records = BTreeMap<String, Vec<Value>>;

/// Backend seam: load everything, save everything. The engine owns the
/// in-memory view and transaction semantics.
pub trait Storage {
    fn load(&self) -> Result<Records, EngineError>;
    fn save(&self, records: &Records) -> Result<(), EngineError>;
}

pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Storage for JsonFileStorage {
    fn load(&self) -> Result<Records, EngineError> {
        if !self.path.exists() {
            return Ok(Records::new());
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|e| EngineError::Store {
            message: format!("cannot read {}: {e}", self.path.display()),
        })?;
        serde_json::from_str(&raw).map_err(|e| EngineError::Store {
            message: format!("{} is corrupt: {e}", self.path.display()),
        })
    }

    fn save(&self, records: &Records) -> Result<(), EngineError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::Store {
                message: format!("cannot create {}: {e}", parent.display()),
            })?;
        }
        let rendered =
            serde_json::to_string_pretty(records).map_err(|e| EngineError::Store {
                message: format!("cannot encode records: {e}"),
            })?;
        std::fs::write(&self.path, rendered).map_err(|e| EngineError::Store {
            message: format!("cannot write {}: {e}", self.path.display()),
        })
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct NullStorage;

impl Storage for NullStorage {
    fn load(&self) -> Result<Records, EngineError> {
        Ok(Records::new())
    }

    fn save(&self, _records: &Records) -> Result<(), EngineError> {
        Ok(())
    }
}

pub struct RecordStore {
    storage: Box<dyn Storage>,
    records: Records,
    snapshot: Option<Records>,
}

impl RecordStore {
    pub fn open(storage: Box<dyn Storage>) -> Result<Self, EngineError> {
        let records = storage.load()?;
        Ok(Self {
            storage,
            records,
            snapshot: None,
        })
    }

    pub fn begin(&mut self) {
        self.snapshot = Some(self.records.clone());
    }

    pub fn commit(&mut self) -> Result<(), EngineError> {
        self.snapshot = None;
        self.storage.save(&self.records)
    }

    pub fn rollback(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.records = snapshot;
            debug!("record store rolled back");
        }
    }

    pub fn records(&self, record: &str) -> &[Value] {
        self.records
            .get(record)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Upsert: replaces an existing record with the same `id`, otherwise
    /// appends.
    pub fn save_record(&mut self, record: &str, value: Value) {
        let entries = self.records.entry(record.to_string()).or_default();
        if let Some(id) = value.get("id") {
            if let Some(existing) = entries.iter_mut().find(|e| e.get("id") == Some(id)) {
                *existing = value;
                return;
            }
        }
        entries.push(value);
    }

    pub fn create(&mut self, record: &str, value: Value) {
        self.records
            .entry(record.to_string())
            .or_default()
            .push(value);
    }

    pub fn update(&mut self, record: &str, value: Value) -> Result<(), EngineError> {
        let id = value.get("id").cloned().ok_or_else(|| EngineError::Store {
            message: format!("update on '{record}' requires an 'id' field"),
        })?;
        let existing = self
            .records
            .get_mut(record)
            .and_then(|entries| entries.iter_mut().find(|e| e.get("id") == Some(&id)));
        match existing {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(EngineError::Store {
                message: format!("no '{record}' record with id {id}"),
            }),
        }
    }

    /// Delete by `id` (accepts a bare id value or an object carrying one).
    pub fn delete(&mut self, record: &str, value: &Value) -> Result<(), EngineError> {
        let id = value.get("id").cloned().unwrap_or_else(|| value.clone());
        let removed = self.records.get_mut(record).is_some_and(|entries| {
            let before = entries.len();
            entries.retain(|e| e.get("id") != Some(&id));
            entries.len() != before
        });
        if !removed {
            return Err(EngineError::Store {
                message: format!("no '{record}' record with id {id}"),
            });
        }
        Ok(())
    }
}

pub fn storage_for(project_root: &Path, storage_path: &Path) -> Box<dyn Storage> {
    Box::new(JsonFileStorage::new(project_root.join(storage_path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_empty() -> RecordStore {
        RecordStore::open(Box::new(NullStorage)).unwrap()
    }

    #[test]
    fn save_upserts_by_id() {
        let mut store = open_empty();
        store.save_record("notes", json!({"id": 1, "title": "draft"}));
        store.save_record("notes", json!({"id": 1, "title": "final"}));
        store.save_record("notes", json!({"id": 2, "title": "other"}));
        assert_eq!(store.records("notes").len(), 2);
        assert_eq!(store.records("notes")[0]["title"], json!("final"));
    }

    #[test]
    fn update_requires_an_existing_id() {
        let mut store = open_empty();
        let err = store.update("notes", json!({"id": 9})).unwrap_err();
        assert!(err.to_string().contains("id"));
    }

    #[test]
    fn failed_update_and_delete_leave_no_empty_record_lists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        let mut store =
            RecordStore::open(Box::new(JsonFileStorage::new(&path))).unwrap();
        assert!(store.update("notes", json!({"id": 9})).is_err());
        assert!(store.delete("notes", &json!(9)).is_err());
        store.commit().unwrap();
        let persisted: Records =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(persisted.is_empty());
    }

    #[test]
    fn delete_accepts_bare_id() {
        let mut store = open_empty();
        store.create("notes", json!({"id": 1}));
        store.delete("notes", &json!(1)).unwrap();
        assert!(store.records("notes").is_empty());
    }

    #[test]
    fn rollback_restores_the_snapshot() {
        let mut store = open_empty();
        store.create("notes", json!({"id": 1}));
        store.begin();
        store.create("notes", json!({"id": 2}));
        store.rollback();
        assert_eq!(store.records("notes").len(), 1);
    }

    #[test]
    fn commit_persists_through_the_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        {
            let mut store =
                RecordStore::open(Box::new(JsonFileStorage::new(&path))).unwrap();
            store.begin();
            store.create("notes", json!({"id": 1, "title": "kept"}));
            store.commit().unwrap();
        }
        let store = RecordStore::open(Box::new(JsonFileStorage::new(&path))).unwrap();
        assert_eq!(store.records("notes")[0]["title"], json!("kept"));
    }
}
