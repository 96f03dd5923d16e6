//! Record store layer: the contract the write workflow talks to, a
//! directory-backed store for offline runs, and bounded retries.

mod error;
pub use error::StoreError;

pub mod memory;
pub mod retry;
pub mod source;

pub use memory::MemoryStore;
pub use retry::{DEFAULT_RETRIES, with_retries};
pub use source::StoreSource;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row of a record table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    /// The process (or contact, source, flow) document.
    #[serde(rename = "json")]
    pub content: Value,
    pub version: String,
    #[serde(default, rename = "state_code")]
    pub state: Option<i64>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Selection of ids for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFilter {
    pub table: String,
    pub user_id: Option<String>,
    pub state_code: Option<i64>,
    /// `None` lists everything.
    pub limit: Option<usize>,
}

impl ListFilter {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            user_id: None,
            state_code: None,
            limit: None,
        }
    }

    pub fn matches(&self, record: &StoredRecord) -> bool {
        self.user_id
            .as_deref()
            .is_none_or(|user| record.user_id.as_deref() == Some(user))
            && self.state_code.is_none_or(|state| record.state == Some(state))
    }
}

/// Versioned access to record tables.
///
/// `update` only succeeds when the stored version still equals `version`;
/// otherwise it returns [`StoreError::Conflict`] and leaves the row alone.
pub trait RecordStore {
    fn list_ids(&self, filter: &ListFilter) -> Result<Vec<String>, StoreError>;

    fn fetch(&self, table: &str, id: &str) -> Result<Option<StoredRecord>, StoreError>;

    fn update(
        &self,
        table: &str,
        id: &str,
        version: &str,
        content: &Value,
    ) -> Result<StoredRecord, StoreError>;
}
