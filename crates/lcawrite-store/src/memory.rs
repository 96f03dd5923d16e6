//! In-memory record store, optionally backed by a directory of JSON files.
//!
//! Directory layout: `<root>/<table>/<id>.json`, one process document per
//! file. Updates are written back to the file when the store was loaded from
//! a directory.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use lcawrite_core::reference::DEFAULT_VERSION;
use lcawrite_core::tree;
use serde_json::Value;
use tracing::{debug, info};

use crate::{ListFilter, RecordStore, StoreError, StoredRecord};

const VERSION_PATH: [&str; 3] = [
    "administrativeInformation",
    "publicationAndOwnership",
    "common:dataSetVersion",
];

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RefCell<BTreeMap<(String, String), StoredRecord>>,
    root: Option<PathBuf>,
    failures: Cell<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `<table>/<id>.json` under `root`.
    pub fn load_dir(root: &Path) -> Result<Self, StoreError> {
        let store = Self {
            root: Some(root.to_path_buf()),
            ..Self::default()
        };
        for table_dir in read_dir(root)? {
            if !table_dir.is_dir() {
                continue;
            }
            let Some(table) = file_stem(&table_dir) else {
                continue;
            };
            for file in read_dir(&table_dir)? {
                if file.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                let Some(id) = file_stem(&file) else {
                    continue;
                };
                let raw = fs::read_to_string(&file).map_err(|source| StoreError::Io {
                    path: file.clone(),
                    source,
                })?;
                let content: Value =
                    serde_json::from_str(&raw).map_err(|err| StoreError::InvalidRecord {
                        id: id.clone(),
                        reason: err.to_string(),
                    })?;
                store.insert(&table, StoredRecord {
                    version: document_version(&content),
                    id,
                    content,
                    state: None,
                    user_id: None,
                });
            }
        }
        info!(root = %root.display(), count = store.len(), "loaded record directory");
        Ok(store)
    }

    pub fn insert(&self, table: &str, record: StoredRecord) {
        self.records
            .borrow_mut()
            .insert((table.to_string(), record.id.clone()), record);
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }

    pub fn get(&self, table: &str, id: &str) -> Option<StoredRecord> {
        self.records
            .borrow()
            .get(&(table.to_string(), id.to_string()))
            .cloned()
    }

    /// Make the next `count` calls fail with a transport error.
    pub fn fail_next(&self, count: usize) {
        self.failures.set(count);
    }

    fn injected_failure(&self) -> Result<(), StoreError> {
        let remaining = self.failures.get();
        if remaining == 0 {
            return Ok(());
        }
        self.failures.set(remaining - 1);
        Err(StoreError::Transport("injected failure".into()))
    }

    fn persist(&self, table: &str, id: &str, content: &Value) -> Result<(), StoreError> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        let path = root.join(table).join(format!("{id}.json"));
        let body = serde_json::to_string_pretty(content)?;
        fs::write(&path, body).map_err(|source| StoreError::Io { path, source })
    }
}

impl RecordStore for MemoryStore {
    fn list_ids(&self, filter: &ListFilter) -> Result<Vec<String>, StoreError> {
        self.injected_failure()?;
        let records = self.records.borrow();
        let ids = records
            .iter()
            .filter(|((table, _), record)| *table == filter.table && filter.matches(record))
            .map(|((_, id), _)| id.clone())
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(ids)
    }

    fn fetch(&self, table: &str, id: &str) -> Result<Option<StoredRecord>, StoreError> {
        self.injected_failure()?;
        Ok(self.get(table, id))
    }

    fn update(
        &self,
        table: &str,
        id: &str,
        version: &str,
        content: &Value,
    ) -> Result<StoredRecord, StoreError> {
        self.injected_failure()?;
        let key = (table.to_string(), id.to_string());
        let updated = {
            let mut records = self.records.borrow_mut();
            let record = records.get_mut(&key).ok_or_else(|| StoreError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            })?;
            if record.version != version {
                return Err(StoreError::Conflict {
                    id: id.to_string(),
                    version: version.to_string(),
                });
            }
            record.content = content.clone();
            record.clone()
        };
        self.persist(table, id, content)?;
        debug!(table, id, version, "record updated");
        Ok(updated)
    }
}

fn read_dir(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let entries = fs::read_dir(dir).map_err(|source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}

fn document_version(content: &Value) -> String {
    tree::lookup(tree::process_root(content), &VERSION_PATH)
        .ok()
        .flatten()
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|version| !version.is_empty())
        .unwrap_or(DEFAULT_VERSION)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, version: &str) -> StoredRecord {
        StoredRecord {
            id: id.into(),
            content: json!({"processDataSet": {}}),
            version: version.into(),
            state: Some(0),
            user_id: Some("u1".into()),
        }
    }

    #[test]
    fn list_respects_table_filter_and_limit() {
        let store = MemoryStore::new();
        store.insert("processes", record("a", "1"));
        store.insert("processes", record("b", "1"));
        store.insert("flows", record("c", "1"));

        let mut filter = ListFilter::table("processes");
        assert_eq!(store.list_ids(&filter).unwrap(), vec!["a", "b"]);
        filter.limit = Some(1);
        assert_eq!(store.list_ids(&filter).unwrap(), vec!["a"]);
        filter.limit = None;
        filter.user_id = Some("someone else".into());
        assert!(store.list_ids(&filter).unwrap().is_empty());
    }

    #[test]
    fn update_checks_version() {
        let store = MemoryStore::new();
        store.insert("processes", record("a", "01.00.000"));

        let err = store
            .update("processes", "a", "00.00.001", &json!({"x": 1}))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(
            store.get("processes", "a").unwrap().content,
            json!({"processDataSet": {}})
        );

        let updated = store
            .update("processes", "a", "01.00.000", &json!({"x": 1}))
            .unwrap();
        assert_eq!(updated.content, json!({"x": 1}));
    }

    #[test]
    fn update_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.update("processes", "nope", "1", &json!({})).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.insert("processes", record("a", "1"));
        store.fail_next(1);
        assert!(store.fetch("processes", "a").is_err());
        assert!(store.fetch("processes", "a").unwrap().is_some());
    }

    #[test]
    fn directory_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let tables = dir.path().join("processes");
        fs::create_dir_all(&tables).unwrap();
        let doc = json!({"processDataSet": {"administrativeInformation": {
            "publicationAndOwnership": {"common:dataSetVersion": "01.02.000"}
        }}});
        fs::write(tables.join("p1.json"), doc.to_string()).unwrap();
        fs::write(tables.join("notes.txt"), "ignored").unwrap();

        let store = MemoryStore::load_dir(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        let loaded = store.fetch("processes", "p1").unwrap().unwrap();
        assert_eq!(loaded.version, "01.02.000");

        let changed = json!({"processDataSet": {"changed": true}});
        store.update("processes", "p1", "01.02.000", &changed).unwrap();
        let on_disk: Value =
            serde_json::from_str(&fs::read_to_string(tables.join("p1.json")).unwrap()).unwrap();
        assert_eq!(on_disk, changed);
    }

    #[test]
    fn unversioned_document_gets_default() {
        assert_eq!(document_version(&json!({})), DEFAULT_VERSION);
    }

    #[test]
    fn invalid_json_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tables = dir.path().join("processes");
        fs::create_dir_all(&tables).unwrap();
        fs::write(tables.join("bad.json"), "{not json").unwrap();
        let err = MemoryStore::load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord { id, .. } if id == "bad"));
    }
}
