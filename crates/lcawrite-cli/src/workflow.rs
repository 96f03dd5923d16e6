//! One run: select ids, then fetch, resolve, apply and write back each
//! document in turn.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use lcawrite_core::{AuditLog, Decision, DocumentAudit, DocumentUpdater, RequirementBundle};
use lcawrite_store::{ListFilter, RecordStore, StoreError, StoredRecord, with_retries};
use serde_json::Value;
use tracing::{debug, info, warn};

const RECORD_FIELD: &str = "record";

#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    pub filter: ListFilter,
    pub dry_run: bool,
    pub retries: usize,
    /// Also write each processed document to `<dir>/<id>.json`.
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub attempted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Documents written to the output directory.
    pub written: usize,
}

enum Outcome {
    Updated,
    Unchanged,
    Failed,
}

pub struct Workflow<'a> {
    store: &'a dyn RecordStore,
    bundle: &'a RequirementBundle,
    updater: &'a DocumentUpdater<'a>,
    options: WorkflowOptions,
}

impl<'a> Workflow<'a> {
    pub fn new(
        store: &'a dyn RecordStore,
        bundle: &'a RequirementBundle,
        updater: &'a DocumentUpdater<'a>,
        options: WorkflowOptions,
    ) -> Self {
        Self {
            store,
            bundle,
            updater,
            options,
        }
    }

    /// Process every selected document. Per-document failures are audited
    /// and the run continues; only a failed listing aborts.
    pub fn run(&self, audit: &mut AuditLog) -> anyhow::Result<RunSummary> {
        let filter = &self.options.filter;
        let ids = with_retries(self.options.retries, || self.store.list_ids(filter))
            .with_context(|| format!("listing {} records", filter.table))?;
        info!(
            table = %filter.table,
            count = ids.len(),
            dry_run = self.options.dry_run,
            "starting run"
        );

        if let Some(dir) = &self.options.output_dir {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating output directory {}", dir.display()))?;
        }

        let mut summary = RunSummary::default();
        for id in ids.iter().take(filter.limit.unwrap_or(usize::MAX)) {
            summary.attempted += 1;
            let mut scoped = audit.scope(id);
            let (outcome, document) = self.process(id, &mut scoped);
            match outcome {
                Outcome::Updated => summary.updated += 1,
                Outcome::Unchanged => summary.unchanged += 1,
                Outcome::Failed => summary.failed += 1,
            }
            if let Some(document) = document
                && self.write_output(id, &document, &mut scoped)
            {
                summary.written += 1;
            }
        }

        info!(
            attempted = summary.attempted,
            updated = summary.updated,
            unchanged = summary.unchanged,
            failed = summary.failed,
            written = summary.written,
            "run finished"
        );
        Ok(summary)
    }

    fn process(&self, id: &str, audit: &mut DocumentAudit<'_>) -> (Outcome, Option<Value>) {
        let table = self.options.filter.table.as_str();
        let record = match with_retries(self.options.retries, || self.store.fetch(table, id)) {
            Ok(Some(record)) => record,
            Ok(None) => {
                let err = StoreError::NotFound {
                    table: table.to_string(),
                    id: id.to_string(),
                };
                return (store_failure(audit, "fetch", &err), None);
            }
            Err(err) => return (store_failure(audit, "fetch", &err), None),
        };

        let mut document = record.content.clone();
        let resolution = self.bundle.resolve(id, &document, audit);
        debug!(id, path = ?resolution.path, fields = resolution.fields.len(), "resolved updates");
        self.updater
            .apply(&mut document, &resolution.fields, &resolution.exchanges, audit);

        if document == record.content {
            debug!(id, "document unchanged");
            return (Outcome::Unchanged, Some(document));
        }
        if self.options.dry_run {
            info!(id, "dry run: changes not written back");
            return (Outcome::Updated, Some(document));
        }
        match self.write_back(table, &record, &document) {
            Ok(_) => {
                info!(id, version = %record.version, "document updated");
                (Outcome::Updated, Some(document))
            }
            Err(err) => (store_failure(audit, "update", &err), None),
        }
    }

    fn write_back(
        &self,
        table: &str,
        record: &StoredRecord,
        document: &Value,
    ) -> Result<StoredRecord, StoreError> {
        with_retries(self.options.retries, || {
            self.store
                .update(table, &record.id, &record.version, document)
        })
    }

    fn write_output(&self, id: &str, document: &Value, audit: &mut DocumentAudit<'_>) -> bool {
        let Some(dir) = &self.options.output_dir else {
            return false;
        };
        let path = dir.join(format!("{id}.json"));
        let written = serde_json::to_string_pretty(document)
            .map_err(|err| err.to_string())
            .and_then(|body| fs::write(&path, body).map_err(|err| err.to_string()));
        match written {
            Ok(()) => true,
            Err(err) => {
                audit.record(
                    "output",
                    Decision::SkippedStoreError,
                    format!("could not write {}: {err}", path.display()),
                );
                false
            }
        }
    }
}

fn store_failure(audit: &mut DocumentAudit<'_>, action: &str, err: &StoreError) -> Outcome {
    warn!(id = audit.document_id(), action, error = %err, "store call failed");
    audit.record(RECORD_FIELD, Decision::SkippedStoreError, format!("{action} failed: {err}"));
    Outcome::Failed
}
