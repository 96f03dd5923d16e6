//! Cross-document references (contacts, sources, processes, flows).
//!
//! The resolver turns a `(kind, external id)` pair into a fully populated
//! global reference by fetching the target record. It never fails: when the
//! record cannot be found or the lookup errors, it returns a placeholder that
//! keeps the caller's id, flags `needs_review`, and records exactly one
//! `needs-review-placeholder` audit entry. There are no internal retries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::audit::{Decision, DocumentAudit};
use crate::multilang::{self, DEFAULT_LANGUAGE};

/// Short description written into placeholder references.
pub const NEEDS_REVIEW: &str = "<needs review>";
pub const DEFAULT_VERSION: &str = "00.00.000";
pub const DEFAULT_URI_BASE: &str = "https://tiangong.earth/datasets";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Contact,
    Source,
    Process,
    Flow,
}

impl ReferenceKind {
    /// Remote table holding records of this kind.
    pub fn table(self) -> &'static str {
        match self {
            Self::Contact => "contacts",
            Self::Source => "sources",
            Self::Process => "processes",
            Self::Flow => "flows",
        }
    }

    /// ILCD `@type` attribute value.
    pub fn type_label(self) -> &'static str {
        match self {
            Self::Contact => "Contact data set",
            Self::Source => "Source data set",
            Self::Process => "Process data set",
            Self::Flow => "Flow data set",
        }
    }

    fn data_set_key(self) -> &'static str {
        match self {
            Self::Contact => "contactDataSet",
            Self::Source => "sourceDataSet",
            Self::Process => "processDataSet",
            Self::Flow => "flowDataSet",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Contact => "contact",
            Self::Source => "source",
            Self::Process => "process",
            Self::Flow => "flow",
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown reference kind '{0}'")]
pub struct UnknownReferenceKind(pub String);

impl FromStr for ReferenceKind {
    type Err = UnknownReferenceKind;

    /// Accepts `contact`, `contacts` and `Contact data set` style spellings.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let lowered = raw.trim().to_lowercase();
        let stem = lowered.strip_suffix(" data set").unwrap_or(&lowered);
        match stem {
            "contact" | "contacts" => Ok(Self::Contact),
            "source" | "sources" => Ok(Self::Source),
            "process" | "processes" => Ok(Self::Process),
            "flow" | "flows" => Ok(Self::Flow),
            _ => Err(UnknownReferenceKind(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDescriptor {
    pub kind: ReferenceKind,
    #[serde(rename = "id")]
    pub external_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalReference {
    pub kind: ReferenceKind,
    pub ref_object_id: String,
    pub version: String,
    pub uri: String,
    /// `(language, text)` pairs.
    pub short_description: Vec<(String, String)>,
    pub needs_review: bool,
}

impl GlobalReference {
    pub fn placeholder(kind: ReferenceKind, ref_object_id: &str, uri: String) -> Self {
        Self {
            kind,
            ref_object_id: ref_object_id.to_string(),
            version: DEFAULT_VERSION.to_string(),
            uri,
            short_description: vec![(DEFAULT_LANGUAGE.to_string(), NEEDS_REVIEW.to_string())],
            needs_review: true,
        }
    }

    /// ILCD-shaped reference object. A single description is written as an
    /// object, several as a list.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("@type".into(), Value::String(self.kind.type_label().into()));
        map.insert("@refObjectId".into(), Value::String(self.ref_object_id.clone()));
        map.insert("@version".into(), Value::String(self.version.clone()));
        map.insert("@uri".into(), Value::String(self.uri.clone()));
        let mut descriptions: Vec<Value> = self
            .short_description
            .iter()
            .filter(|(_, text)| !text.is_empty())
            .map(|(lang, text)| multilang::entry(lang, text))
            .collect();
        match descriptions.len() {
            0 => {}
            1 => {
                map.insert("common:shortDescription".into(), descriptions.remove(0));
            }
            _ => {
                map.insert("common:shortDescription".into(), Value::Array(descriptions));
            }
        }
        Value::Object(map)
    }
}

// ── Record source ──

/// A record fetched from the reference tables.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub version: Option<String>,
    pub content: Value,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("record lookup failed: {0}")]
pub struct LookupError(pub String);

/// Where the resolver looks up reference targets.
pub trait RecordSource {
    fn fetch_record(&self, table: &str, id: &str) -> Result<Option<SourceRecord>, LookupError>;
}

/// A source with no records: every reference resolves to a placeholder.
pub struct NoRecords;

impl RecordSource for NoRecords {
    fn fetch_record(&self, _table: &str, _id: &str) -> Result<Option<SourceRecord>, LookupError> {
        Ok(None)
    }
}

// ── Resolver ──

pub struct ReferenceResolver<'s> {
    source: &'s dyn RecordSource,
    uri_base: String,
}

impl<'s> ReferenceResolver<'s> {
    pub fn new(source: &'s dyn RecordSource) -> Self {
        Self {
            source,
            uri_base: DEFAULT_URI_BASE.to_string(),
        }
    }

    pub fn with_uri_base(mut self, uri_base: &str) -> Self {
        self.uri_base = uri_base.trim_end_matches('/').to_string();
        self
    }

    pub fn uri_for(&self, id: &str) -> String {
        format!("{}/{}", self.uri_base, id)
    }

    /// Resolve `descriptor` for the field labelled `field`. Check
    /// [`GlobalReference::needs_review`] on the result.
    pub fn resolve(
        &self,
        descriptor: &ReferenceDescriptor,
        field: &str,
        audit: &mut DocumentAudit<'_>,
    ) -> GlobalReference {
        let id = descriptor.external_id.trim();
        let kind = descriptor.kind;
        let record = match self.source.fetch_record(kind.table(), id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                return self.placeholder(kind, id, field, format!("{kind} '{id}' not found"), audit);
            }
            Err(err) => {
                return self.placeholder(kind, id, field, format!("{kind} '{id}': {err}"), audit);
            }
        };

        let version = record
            .version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_VERSION)
            .to_string();
        let mut short_description = describe(kind, &record.content);
        if short_description.is_empty() {
            short_description.push((DEFAULT_LANGUAGE.to_string(), id.to_string()));
        }
        debug!(kind = %kind, id, version = %version, "resolved reference");
        GlobalReference {
            kind,
            ref_object_id: id.to_string(),
            version,
            uri: self.uri_for(id),
            short_description,
            needs_review: false,
        }
    }

    fn placeholder(
        &self,
        kind: ReferenceKind,
        id: &str,
        field: &str,
        reason: String,
        audit: &mut DocumentAudit<'_>,
    ) -> GlobalReference {
        let reference = GlobalReference::placeholder(kind, id, self.uri_for(id));
        audit.record_change(
            field,
            Decision::NeedsReviewPlaceholder,
            format!(
                "{reason}; placeholder reference written, confirm description, uri and version"
            ),
            None,
            Some(reference.to_value()),
        );
        reference
    }
}

// ── Description extraction ──

/// Human-readable names for a fetched record, by kind.
fn describe(kind: ReferenceKind, content: &Value) -> Vec<(String, String)> {
    let section = content.get(kind.data_set_key()).unwrap_or(&Value::Null);
    let info = match kind {
        ReferenceKind::Contact => section.pointer("/contactInformation/dataSetInformation"),
        ReferenceKind::Source => section.pointer("/sourceInformation/dataSetInformation"),
        ReferenceKind::Process => section.pointer("/processInformation/dataSetInformation"),
        ReferenceKind::Flow => section.pointer("/flowInformation/dataSetInformation"),
    };
    let candidates: &[&str] = match kind {
        ReferenceKind::Contact => &["/common:shortName", "/common:name"],
        ReferenceKind::Source => &["/common:shortName", "/sourceCitation"],
        ReferenceKind::Process => &["/name/baseName", "/common:shortName"],
        ReferenceKind::Flow => &["/name", "/common:shortName"],
    };
    if let Some(info) = info {
        for pointer in candidates {
            let found = info.pointer(pointer).map(collect_texts).unwrap_or_default();
            if !found.is_empty() {
                return found;
            }
        }
    }
    find_short_description(content)
}

/// Depth-first search for the first non-empty `common:shortDescription`.
fn find_short_description(value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Object(map) => {
            if let Some(direct) = map.get("common:shortDescription") {
                let found = collect_texts(direct);
                if !found.is_empty() {
                    return found;
                }
            }
            map.values()
                .map(find_short_description)
                .find(|found| !found.is_empty())
                .unwrap_or_default()
        }
        Value::Array(items) => items
            .iter()
            .map(find_short_description)
            .find(|found| !found.is_empty())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Collect language texts anywhere under `value`, de-duplicated in order.
fn collect_texts(value: &Value) -> Vec<(String, String)> {
    fn walk(value: &Value, out: &mut Vec<(String, String)>) {
        match value {
            Value::Array(items) => items.iter().for_each(|item| walk(item, out)),
            Value::Object(map) => {
                if let Some(text) = map.get(multilang::TEXT_KEY).and_then(Value::as_str) {
                    let lang = multilang::language_of(value).unwrap_or(DEFAULT_LANGUAGE);
                    out.push((lang.to_string(), text.to_string()));
                } else {
                    map.values().for_each(|item| walk(item, out));
                }
            }
            Value::String(text) if !text.trim().is_empty() => {
                out.push((DEFAULT_LANGUAGE.to_string(), text.trim().to_string()));
            }
            _ => {}
        }
    }

    let mut raw = Vec::new();
    walk(value, &mut raw);
    let mut out: Vec<(String, String)> = Vec::with_capacity(raw.len());
    for pair in raw {
        if !pair.1.is_empty() && !out.contains(&pair) {
            out.push(pair);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use serde_json::json;
    use std::collections::HashMap;

    struct Fixed(HashMap<(String, String), SourceRecord>);

    impl RecordSource for Fixed {
        fn fetch_record(&self, table: &str, id: &str) -> Result<Option<SourceRecord>, LookupError> {
            Ok(self.0.get(&(table.to_string(), id.to_string())).cloned())
        }
    }

    struct Failing;

    impl RecordSource for Failing {
        fn fetch_record(&self, _: &str, _: &str) -> Result<Option<SourceRecord>, LookupError> {
            Err(LookupError("timeout".into()))
        }
    }

    fn descriptor(kind: ReferenceKind, id: &str) -> ReferenceDescriptor {
        ReferenceDescriptor {
            kind,
            external_id: id.to_string(),
        }
    }

    #[test]
    fn unknown_source_yields_placeholder_and_one_audit_entry() {
        let resolver = ReferenceResolver::new(&NoRecords);
        let mut log = AuditLog::new();
        let reference = resolver.resolve(
            &descriptor(ReferenceKind::Source, "0f3c0000-aaaa-4bbb-8ccc-000000000001"),
            "Data source",
            &mut log.scope("doc"),
        );
        assert!(reference.needs_review);
        assert_eq!(reference.ref_object_id, "0f3c0000-aaaa-4bbb-8ccc-000000000001");
        assert_eq!(reference.short_description[0].1, NEEDS_REVIEW);
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].decision, Decision::NeedsReviewPlaceholder);

        let value = reference.to_value();
        assert_eq!(value["@type"], "Source data set");
        assert_eq!(value["@version"], DEFAULT_VERSION);
        assert_eq!(value["common:shortDescription"]["#text"], NEEDS_REVIEW);
    }

    #[test]
    fn lookup_error_is_a_placeholder_not_a_failure() {
        let resolver = ReferenceResolver::new(&Failing);
        let mut log = AuditLog::new();
        let reference = resolver.resolve(
            &descriptor(ReferenceKind::Contact, "c1"),
            "Owner",
            &mut log.scope("doc"),
        );
        assert!(reference.needs_review);
        assert!(log.entries()[0].reason.contains("timeout"));
    }

    #[test]
    fn resolves_contact_metadata() {
        let mut records = HashMap::new();
        records.insert(
            ("contacts".to_string(), "c1".to_string()),
            SourceRecord {
                version: Some(" 01.00.002 ".into()),
                content: json!({
                    "contactDataSet": {
                        "contactInformation": {
                            "dataSetInformation": {
                                "common:shortName": [
                                    {"@xml:lang": "en", "#text": "Tiangong"},
                                    {"@xml:lang": "zh", "#text": "天工"}
                                ]
                            }
                        }
                    }
                }),
            },
        );
        let source = Fixed(records);
        let resolver = ReferenceResolver::new(&source).with_uri_base("https://example.org/ds/");
        let mut log = AuditLog::new();
        let reference = resolver.resolve(
            &descriptor(ReferenceKind::Contact, "c1"),
            "Owner",
            &mut log.scope("doc"),
        );
        assert!(!reference.needs_review);
        assert!(log.is_empty());
        assert_eq!(reference.version, "01.00.002");
        assert_eq!(reference.uri, "https://example.org/ds/c1");
        let value = reference.to_value();
        assert_eq!(value["@type"], "Contact data set");
        assert_eq!(value["common:shortDescription"][1]["#text"], "天工");
    }

    #[test]
    fn falls_back_to_nested_short_description_then_id() {
        let mut records = HashMap::new();
        records.insert(
            ("sources".to_string(), "s1".to_string()),
            SourceRecord {
                version: None,
                content: json!({"meta": [{"common:shortDescription": {"#text": "Report"}}]}),
            },
        );
        records.insert(
            ("sources".to_string(), "s2".to_string()),
            SourceRecord {
                version: None,
                content: json!({}),
            },
        );
        let source = Fixed(records);
        let resolver = ReferenceResolver::new(&source);
        let mut log = AuditLog::new();
        let mut audit = log.scope("doc");

        let first = resolver.resolve(&descriptor(ReferenceKind::Source, "s1"), "f", &mut audit);
        assert_eq!(first.short_description, vec![("en".to_string(), "Report".to_string())]);
        assert_eq!(first.version, DEFAULT_VERSION);

        let second = resolver.resolve(&descriptor(ReferenceKind::Source, "s2"), "f", &mut audit);
        assert_eq!(second.short_description, vec![("en".to_string(), "s2".to_string())]);
    }

    #[test]
    fn kind_parsing() {
        assert_eq!("Contact data set".parse(), Ok(ReferenceKind::Contact));
        assert_eq!("sources".parse(), Ok(ReferenceKind::Source));
        assert_eq!(" Flow ".parse(), Ok(ReferenceKind::Flow));
        assert!("unit group".parse::<ReferenceKind>().is_err());
    }
}
