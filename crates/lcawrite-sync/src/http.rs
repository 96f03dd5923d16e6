//! Blocking HTTP client for record tables served at `{base}/rest/v1/{table}`.

use lcawrite_store::{ListFilter, RecordStore, StoreError, StoredRecord};
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

const REST_PREFIX: &str = "rest/v1";
const RECORD_COLUMNS: &str = "id,json_ordered,json,version,state_code,user_id";

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad response: {0}")]
    Decode(String),
}

impl From<SyncError> for StoreError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Http(err) => StoreError::Transport(err.to_string()),
            SyncError::Server { status, body } if status >= 500 || status == 429 => {
                StoreError::Transport(format!("server returned {status}: {body}"))
            }
            SyncError::Json(err) => StoreError::Json(err),
            other => StoreError::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Row {
    id: String,
    #[serde(default)]
    json_ordered: Option<Value>,
    #[serde(default)]
    json: Option<Value>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    state_code: Option<i64>,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Deserialize)]
struct IdRow {
    id: String,
}

/// Record store backed by the remote table API.
pub struct HttpRecordStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpRecordStore {
    /// `base_url` is the project URL, e.g. `https://example.supabase.co`.
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, SyncError> {
        Ok(Self {
            client: Client::builder().build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn table_url(&self, table: &str, params: &[(&str, String)]) -> Result<Url, SyncError> {
        let raw = format!("{}/{REST_PREFIX}/{table}", self.base_url);
        Url::parse_with_params(&raw, params)
            .map_err(|err| SyncError::Decode(format!("{raw}: {err}")))
    }

    fn fetch_url(&self, table: &str, id: &str) -> Result<Url, SyncError> {
        self.table_url(table, &[
            ("select", RECORD_COLUMNS.to_string()),
            ("id", format!("eq.{id}")),
        ])
    }

    fn list_url(&self, filter: &ListFilter) -> Result<Url, SyncError> {
        let mut params = vec![
            ("select", "id".to_string()),
            ("order", "id.asc".to_string()),
        ];
        if let Some(user) = &filter.user_id {
            params.push(("user_id", format!("eq.{user}")));
        }
        if let Some(state) = filter.state_code {
            params.push(("state_code", format!("eq.{state}")));
        }
        if let Some(limit) = filter.limit {
            params.push(("limit", limit.to_string()));
        }
        self.table_url(&filter.table, &params)
    }

    fn update_url(&self, table: &str, id: &str, version: &str) -> Result<Url, SyncError> {
        self.table_url(table, &[
            ("id", format!("eq.{id}")),
            ("version", format!("eq.{version}")),
            ("select", RECORD_COLUMNS.to_string()),
        ])
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("apikey", key).bearer_auth(key),
            None => request,
        }
    }

    fn send(&self, request: RequestBuilder) -> Result<Vec<u8>, SyncError> {
        let resp = self.authorize(request).send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(server_error(resp));
        }
        Ok(resp.bytes()?.to_vec())
    }

    fn get_rows(&self, url: Url) -> Result<Vec<Row>, SyncError> {
        debug!(url = %url, "fetching rows");
        let body = self.send(self.client.get(url))?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn server_error(resp: Response) -> SyncError {
    let status = resp.status().as_u16();
    let body = resp.text().unwrap_or_default();
    SyncError::Server { status, body }
}

/// The ordered document column wins over the plain one. Some deployments
/// return it as a JSON string.
fn decode_row(row: Row) -> Result<StoredRecord, SyncError> {
    let content = match (row.json_ordered, row.json) {
        (Some(Value::String(raw)), _) => serde_json::from_str(&raw)?,
        (Some(ordered), _) if !ordered.is_null() => ordered,
        (_, Some(plain)) if !plain.is_null() => plain,
        _ => {
            return Err(SyncError::Decode(format!("record {} has no document", row.id)));
        }
    };
    Ok(StoredRecord {
        version: row
            .version
            .ok_or_else(|| SyncError::Decode(format!("record {} has no version", row.id)))?,
        id: row.id,
        content,
        state: row.state_code,
        user_id: row.user_id,
    })
}

impl RecordStore for HttpRecordStore {
    fn list_ids(&self, filter: &ListFilter) -> Result<Vec<String>, StoreError> {
        let url = self.list_url(filter)?;
        info!(table = %filter.table, "listing record ids");
        let body = self.send(self.client.get(url))?;
        let rows: Vec<IdRow> = serde_json::from_slice(&body)?;
        info!(count = rows.len(), "listed record ids");
        Ok(rows.into_iter().map(|row| row.id).collect())
    }

    fn fetch(&self, table: &str, id: &str) -> Result<Option<StoredRecord>, StoreError> {
        let rows = self.get_rows(self.fetch_url(table, id)?)?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(decode_row(row)?)),
            None => Ok(None),
        }
    }

    fn update(
        &self,
        table: &str,
        id: &str,
        version: &str,
        content: &Value,
    ) -> Result<StoredRecord, StoreError> {
        let url = self.update_url(table, id, version)?;
        debug!(url = %url, "updating record");
        let request = self
            .client
            .patch(url)
            .header("Prefer", "return=representation")
            .json(&json!({ "json_ordered": content }));
        let body = self.send(request)?;
        let rows: Vec<Row> = serde_json::from_slice(&body)?;
        let Some(row) = rows.into_iter().next() else {
            return Err(StoreError::Conflict {
                id: id.to_string(),
                version: version.to_string(),
            });
        };
        info!(table, id, version, "record written back");
        Ok(decode_row(row)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> HttpRecordStore {
        HttpRecordStore::new("https://db.example.org/", Some("key".into())).unwrap()
    }

    #[test]
    fn trims_trailing_slash() {
        assert_eq!(store().base_url, "https://db.example.org");
    }

    #[test]
    fn fetch_url_selects_by_id() {
        let url = store().fetch_url("processes", "abc-1").unwrap();
        assert_eq!(url.path(), "/rest/v1/processes");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("id".into(), "eq.abc-1".into())));
        assert!(pairs.contains(&("select".into(), RECORD_COLUMNS.into())));
    }

    #[test]
    fn list_url_carries_filters() {
        let filter = ListFilter {
            table: "processes".into(),
            user_id: Some("u-9".into()),
            state_code: Some(100),
            limit: Some(25),
        };
        let url = store().list_url(&filter).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("user_id".into(), "eq.u-9".into())));
        assert!(pairs.contains(&("state_code".into(), "eq.100".into())));
        assert!(pairs.contains(&("limit".into(), "25".into())));

        let url = store().list_url(&ListFilter::table("processes")).unwrap();
        assert!(url.query_pairs().all(|(key, _)| key != "limit"));
    }

    #[test]
    fn update_url_pins_version() {
        let url = store().update_url("processes", "p1", "01.00.000").unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("version".into(), "eq.01.00.000".into())));
        assert!(pairs.contains(&("id".into(), "eq.p1".into())));
    }

    #[test]
    fn decode_prefers_ordered_column() {
        let row: Row = serde_json::from_value(json!({
            "id": "p1",
            "json_ordered": {"a": 1},
            "json": {"b": 2},
            "version": "01.00.000",
        }))
        .unwrap();
        let record = decode_row(row).unwrap();
        assert_eq!(record.content, json!({"a": 1}));
        assert_eq!(record.state, None);
    }

    #[test]
    fn decode_falls_back_and_parses_strings() {
        let row: Row = serde_json::from_value(json!({
            "id": "p1",
            "json_ordered": null,
            "json": {"b": 2},
            "version": "01.00.000",
            "state_code": 0,
        }))
        .unwrap();
        assert_eq!(decode_row(row).unwrap().content, json!({"b": 2}));

        let row: Row = serde_json::from_value(json!({
            "id": "p2",
            "json_ordered": "{\"c\": 3}",
            "version": "01.00.000",
        }))
        .unwrap();
        assert_eq!(decode_row(row).unwrap().content, json!({"c": 3}));
    }

    #[test]
    fn decode_rejects_empty_rows() {
        let row: Row = serde_json::from_value(json!({"id": "p1", "version": "1"})).unwrap();
        assert!(matches!(decode_row(row), Err(SyncError::Decode(_))));
    }

    #[test]
    fn server_errors_map_to_store_errors() {
        let err: StoreError = SyncError::Server {
            status: 503,
            body: "busy".into(),
        }
        .into();
        assert!(err.is_retryable());

        let err: StoreError = SyncError::Server {
            status: 401,
            body: "denied".into(),
        }
        .into();
        assert!(!err.is_retryable());
    }
}
