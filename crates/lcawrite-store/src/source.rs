use lcawrite_core::reference::{LookupError, RecordSource, SourceRecord};

use crate::{RecordStore, StoreError, with_retries};

/// Exposes a [`RecordStore`] as the reference resolver's record source.
pub struct StoreSource<'a> {
    store: &'a dyn RecordStore,
    retries: usize,
}

impl<'a> StoreSource<'a> {
    pub fn new(store: &'a dyn RecordStore, retries: usize) -> Self {
        Self { store, retries }
    }
}

impl RecordSource for StoreSource<'_> {
    fn fetch_record(&self, table: &str, id: &str) -> Result<Option<SourceRecord>, LookupError> {
        let record = with_retries(self.retries, || self.store.fetch(table, id))
            .map_err(|err: StoreError| LookupError(err.to_string()))?;
        Ok(record.map(|record| SourceRecord {
            version: Some(record.version),
            content: record.content,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStore, StoredRecord};
    use serde_json::json;

    #[test]
    fn maps_records_and_errors() {
        let store = MemoryStore::new();
        store.insert("contacts", StoredRecord {
            id: "c1".into(),
            content: json!({"contactDataSet": {}}),
            version: "01.00.000".into(),
            state: None,
            user_id: None,
        });
        let source = StoreSource::new(&store, 0);

        let found = source.fetch_record("contacts", "c1").unwrap().unwrap();
        assert_eq!(found.version.as_deref(), Some("01.00.000"));
        assert!(source.fetch_record("contacts", "missing").unwrap().is_none());

        store.fail_next(1);
        let err = source.fetch_record("contacts", "c1").unwrap_err();
        assert!(err.0.contains("injected failure"));
    }

    #[test]
    fn retries_transient_lookup_failures() {
        let store = MemoryStore::new();
        store.insert("sources", StoredRecord {
            id: "s1".into(),
            content: json!({}),
            version: "00.00.001".into(),
            state: None,
            user_id: None,
        });
        store.fail_next(2);
        let source = StoreSource::new(&store, 2);
        assert!(source.fetch_record("sources", "s1").unwrap().is_some());
    }
}
