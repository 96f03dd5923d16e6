//! Append-only audit trail of merge decisions.
//!
//! One [`AuditLog`] is built per run and handed down explicitly; per-document
//! callers borrow it through a [`DocumentAudit`] scope that stamps the
//! document id on every entry. The log is flushed once, as JSON Lines.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    Applied,
    SkippedUnmapped,
    SkippedLowConfidence,
    NeedsReviewPlaceholder,
    Overwritten,
    SkippedStoreError,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::SkippedUnmapped => "skipped-unmapped",
            Self::SkippedLowConfidence => "skipped-low-confidence",
            Self::NeedsReviewPlaceholder => "needs-review-placeholder",
            Self::Overwritten => "overwritten",
            Self::SkippedStoreError => "skipped-store-error",
        }
    }

    /// Everything except a plain successful write wants a human to look at it.
    pub fn needs_attention(&self) -> bool {
        !matches!(self, Self::Applied)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub document_id: String,
    /// Field label, or a document path for normalization decisions.
    pub field: String,
    pub decision: Decision,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to write audit log '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialise audit entry: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: AuditEntry) {
        if entry.decision.needs_attention() {
            warn!(
                document_id = %entry.document_id,
                field = %entry.field,
                decision = entry.decision.as_str(),
                reason = %entry.reason,
                "audit"
            );
        } else {
            debug!(
                document_id = %entry.document_id,
                field = %entry.field,
                reason = %entry.reason,
                "audit"
            );
        }
        self.entries.push(entry);
    }

    /// Scope the log to one document.
    pub fn scope(&mut self, document_id: &str) -> DocumentAudit<'_> {
        DocumentAudit {
            log: self,
            document_id: document_id.to_string(),
        }
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, decision: Decision) -> usize {
        self.entries.iter().filter(|e| e.decision == decision).count()
    }

    pub fn needs_attention(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter().filter(|e| e.decision.needs_attention())
    }

    pub fn to_json_lines(&self) -> Result<String, AuditError> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Write every entry to `path`, one JSON object per line.
    ///
    /// An empty log removes any stale file left by a previous run. Returns the
    /// number of entries written.
    pub fn flush(&self, path: &Path) -> Result<usize, AuditError> {
        let io_err = |source| AuditError::Io {
            path: path.to_path_buf(),
            source,
        };
        if self.entries.is_empty() {
            if path.exists() {
                fs::remove_file(path).map_err(io_err)?;
                info!(path = %path.display(), "removed stale audit log");
            }
            return Ok(0);
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, self.to_json_lines()?).map_err(io_err)?;
        info!(
            path = %path.display(),
            entries = self.entries.len(),
            attention = self.needs_attention().count(),
            "audit log written"
        );
        Ok(self.entries.len())
    }
}

/// A borrow of the run's [`AuditLog`] bound to one document id.
pub struct DocumentAudit<'a> {
    log: &'a mut AuditLog,
    document_id: String,
}

impl DocumentAudit<'_> {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn record(
        &mut self,
        field: impl Into<String>,
        decision: Decision,
        reason: impl Into<String>,
    ) {
        self.record_change(field, decision, reason, None, None);
    }

    pub fn record_change(
        &mut self,
        field: impl Into<String>,
        decision: Decision,
        reason: impl Into<String>,
        before: Option<Value>,
        after: Option<Value>,
    ) {
        self.log.append(AuditEntry {
            document_id: self.document_id.clone(),
            field: field.into(),
            decision,
            reason: reason.into(),
            before,
            after,
            recorded_at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scope_stamps_document_id() {
        let mut log = AuditLog::new();
        log.scope("doc-1")
            .record("X", Decision::SkippedUnmapped, "no mapping");
        log.scope("doc-2").record_change(
            "Y",
            Decision::Overwritten,
            "replaced",
            Some(json!("a")),
            Some(json!("b")),
        );
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[0].document_id, "doc-1");
        assert_eq!(log.entries()[1].before, Some(json!("a")));
        assert_eq!(log.count(Decision::Overwritten), 1);
    }

    #[test]
    fn decisions_serialise_kebab_case() {
        let text = serde_json::to_string(&Decision::NeedsReviewPlaceholder).unwrap();
        assert_eq!(text, "\"needs-review-placeholder\"");
        assert_eq!(Decision::SkippedLowConfidence.as_str(), "skipped-low-confidence");
        assert!(!Decision::Applied.needs_attention());
        assert!(Decision::Overwritten.needs_attention());
    }

    #[test]
    fn flush_writes_json_lines() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("audit.jsonl");
        let mut log = AuditLog::new();
        {
            let mut scope = log.scope("doc");
            scope.record("A", Decision::Applied, "value written");
            scope.record("B", Decision::SkippedUnmapped, "no schema target for label");
        }
        assert_eq!(log.flush(&path).unwrap(), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<AuditEntry> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].decision, Decision::SkippedUnmapped);
        assert!(parsed[0].before.is_none());
    }

    #[test]
    fn empty_flush_removes_stale_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("audit.jsonl");
        std::fs::write(&path, "stale\n").unwrap();
        assert_eq!(AuditLog::new().flush(&path).unwrap(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn needs_attention_filters_applied() {
        let mut log = AuditLog::new();
        let mut scope = log.scope("d");
        scope.record("a", Decision::Applied, "ok");
        scope.record("b", Decision::NeedsReviewPlaceholder, "missing");
        assert_eq!(log.needs_attention().count(), 1);
    }
}
