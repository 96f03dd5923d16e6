//! Requirement bundles: the parsed form of a requirement YAML file.
//!
//! Labels are resolved against the [`FieldCatalog`] once, at load time, so
//! every [`FieldUpdate`] already knows its schema path and value kind. Labels
//! the catalog does not know become updates with an empty path; they are
//! skipped and audited when applied.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::{FieldCatalog, FieldSpec, ValueKind};
use crate::multilang::DEFAULT_LANGUAGE;
use crate::path::SchemaPath;
use crate::reference::{ReferenceDescriptor, ReferenceKind};

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("requirement file '{0}' does not exist")]
    Missing(PathBuf),

    #[error("requirement file '{0}' must be YAML (.yaml/.yml)")]
    NotYaml(PathBuf),

    #[error("failed to read requirement file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid requirement file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}: update is missing 'ui_label'")]
    MissingLabel(String),

    #[error("field '{0}' is missing a 'value'")]
    MissingValue(String),

    #[error("field '{label}': {reason}")]
    InvalidField { label: String, reason: String },

    #[error("process update #{0} is missing 'process_name'")]
    MissingProcessName(usize),

    #[error("binding for '{id}' names unknown template '{template}'")]
    UnknownTemplate { id: String, template: String },
}

// ── Model ──

/// Raw payload of an update, shaped by its value kind.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// String, number or boolean.
    Scalar(Value),
    /// `(language, text)` pairs in the order given.
    Languages(Vec<(String, String)>),
    Reference(ReferenceDescriptor),
}

impl FieldValue {
    /// Text of a scalar value; numbers and booleans are rendered.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Scalar(Value::String(text)) => Some(text.trim().to_string()),
            Self::Scalar(Value::Number(n)) => Some(n.to_string()),
            Self::Scalar(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub label: String,
    pub schema_path: SchemaPath,
    pub value_kind: ValueKind,
    pub value: FieldValue,
    /// Whether an existing non-empty value may be replaced.
    pub overwrite: bool,
}

impl FieldUpdate {
    pub fn new(
        label: impl Into<String>,
        schema_path: SchemaPath,
        value_kind: ValueKind,
        value: FieldValue,
    ) -> Self {
        Self {
            label: label.into(),
            schema_path,
            value_kind,
            value,
            overwrite: true,
        }
    }

    /// Keep an existing non-empty value instead of replacing it.
    pub fn preserving(mut self) -> Self {
        self.overwrite = false;
        self
    }

    pub fn is_mapped(&self) -> bool {
        !self.schema_path.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchKind {
    All,
    Unsupported(String),
}

impl MatchKind {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("all") {
            Self::All
        } else {
            Self::Unsupported(raw.trim().to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeUpdate {
    pub match_kind: MatchKind,
    /// Updates rooted at each matched exchange entry.
    pub fields: Vec<FieldUpdate>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    pub fields: Vec<FieldUpdate>,
    pub exchanges: Vec<ExchangeUpdate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NameRule {
    /// Composite process name; `*` matches any run of characters.
    pub process_name: String,
    pub rules: RuleSet,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequirementBundle {
    pub global_rules: Vec<FieldUpdate>,
    pub name_rules: Vec<NameRule>,
    pub templates: BTreeMap<String, RuleSet>,
    /// Document id → template name.
    pub bindings: BTreeMap<String, String>,
    pub exchange_rules: Vec<ExchangeUpdate>,
}

// ── YAML shape ──

fn default_true() -> bool {
    true
}

fn default_match() -> String {
    "all".to_string()
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBundle {
    #[serde(default)]
    global_updates: Vec<RawField>,
    #[serde(default)]
    process_updates: Vec<RawProcess>,
    #[serde(default)]
    templates: BTreeMap<String, RawTemplate>,
    #[serde(default)]
    bindings: BTreeMap<String, String>,
    #[serde(default)]
    exchange_updates: Vec<RawExchange>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawField {
    #[serde(default)]
    ui_label: Option<String>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default = "default_true")]
    overwrite: bool,
    #[serde(default)]
    path: Option<SchemaPath>,
    #[serde(default)]
    kind: Option<ValueKind>,
    #[serde(default)]
    reference: Option<ReferenceKind>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProcess {
    #[serde(default)]
    process_name: Option<String>,
    #[serde(default)]
    fields: Vec<RawField>,
    #[serde(default)]
    exchange_updates: Vec<RawExchange>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTemplate {
    #[serde(default)]
    fields: Vec<RawField>,
    #[serde(default)]
    exchange_updates: Vec<RawExchange>,
}

/// An exchange update: the `ui_label`/`value` shorthand, a `fields` list, or both.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExchange {
    #[serde(rename = "match", default = "default_match")]
    match_kind: String,
    #[serde(default)]
    ui_label: Option<String>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default = "default_true")]
    overwrite: bool,
    #[serde(default)]
    path: Option<SchemaPath>,
    #[serde(default)]
    kind: Option<ValueKind>,
    #[serde(default)]
    reference: Option<ReferenceKind>,
    #[serde(default)]
    fields: Vec<RawField>,
}

#[derive(Clone, Copy)]
enum Scope {
    Document,
    Exchange,
}

impl Scope {
    fn spec<'c>(self, catalog: &'c FieldCatalog, label: &str) -> Option<&'c FieldSpec> {
        match self {
            Self::Document => catalog.field(label),
            Self::Exchange => catalog.exchange_field(label),
        }
    }
}

// ── Loading ──

impl RequirementBundle {
    pub fn load(path: &Path, catalog: &FieldCatalog) -> Result<Self, BundleError> {
        if !path.exists() {
            return Err(BundleError::Missing(path.to_path_buf()));
        }
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
        if !is_yaml {
            return Err(BundleError::NotYaml(path.to_path_buf()));
        }
        let src = std::fs::read_to_string(path).map_err(|source| BundleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let bundle = Self::from_yaml_str(&src, catalog)?;
        info!(
            path = %path.display(),
            global = bundle.global_rules.len(),
            processes = bundle.name_rules.len(),
            templates = bundle.templates.len(),
            bindings = bundle.bindings.len(),
            exchanges = bundle.exchange_rules.len(),
            "loaded requirement bundle"
        );
        Ok(bundle)
    }

    pub fn from_yaml_str(src: &str, catalog: &FieldCatalog) -> Result<Self, BundleError> {
        // An empty document is an empty bundle.
        let raw: Option<RawBundle> = serde_yaml::from_str(src)?;
        let raw = raw.unwrap_or_default();

        let global_rules =
            build_fields(raw.global_updates, catalog, Scope::Document, "global update")?;

        let mut name_rules = Vec::with_capacity(raw.process_updates.len());
        for (index, process) in raw.process_updates.into_iter().enumerate() {
            let process_name = process
                .process_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .ok_or(BundleError::MissingProcessName(index + 1))?;
            let context = format!("process '{process_name}'");
            let rules = RuleSet {
                fields: build_fields(process.fields, catalog, Scope::Document, &context)?,
                exchanges: build_exchanges(process.exchange_updates, catalog, &context)?,
            };
            name_rules.push(NameRule { process_name, rules });
        }

        let mut templates = BTreeMap::new();
        for (name, template) in raw.templates {
            let context = format!("template '{name}'");
            let rules = RuleSet {
                fields: build_fields(template.fields, catalog, Scope::Document, &context)?,
                exchanges: build_exchanges(template.exchange_updates, catalog, &context)?,
            };
            templates.insert(name, rules);
        }

        let bundle = Self {
            global_rules,
            name_rules,
            templates,
            bindings: raw
                .bindings
                .into_iter()
                .map(|(id, template)| (id.trim().to_string(), template.trim().to_string()))
                .collect(),
            exchange_rules: build_exchanges(raw.exchange_updates, catalog, "exchange update")?,
        };
        bundle.validate()?;
        Ok(bundle)
    }

    /// Every binding must name a defined template.
    pub fn validate(&self) -> Result<(), BundleError> {
        for (id, template) in &self.bindings {
            if !self.templates.contains_key(template) {
                return Err(BundleError::UnknownTemplate {
                    id: id.clone(),
                    template: template.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.global_rules.is_empty()
            && self.name_rules.is_empty()
            && self.bindings.is_empty()
            && self.exchange_rules.is_empty()
    }
}

fn build_fields(
    raw: Vec<RawField>,
    catalog: &FieldCatalog,
    scope: Scope,
    context: &str,
) -> Result<Vec<FieldUpdate>, BundleError> {
    raw.into_iter()
        .map(|field| {
            build_update(
                FieldParts {
                    label: field.ui_label,
                    value: field.value,
                    overwrite: field.overwrite,
                    path: field.path,
                    kind: field.kind,
                    reference: field.reference,
                },
                catalog,
                scope,
                context,
            )
        })
        .collect()
}

fn build_exchanges(
    raw: Vec<RawExchange>,
    catalog: &FieldCatalog,
    context: &str,
) -> Result<Vec<ExchangeUpdate>, BundleError> {
    let mut out = Vec::with_capacity(raw.len());
    for exchange in raw {
        let mut fields = Vec::with_capacity(exchange.fields.len() + 1);
        if exchange.ui_label.is_some() || exchange.value.is_some() {
            fields.push(build_update(
                FieldParts {
                    label: exchange.ui_label,
                    value: exchange.value,
                    overwrite: exchange.overwrite,
                    path: exchange.path,
                    kind: exchange.kind,
                    reference: exchange.reference,
                },
                catalog,
                Scope::Exchange,
                context,
            )?);
        }
        fields.extend(build_fields(exchange.fields, catalog, Scope::Exchange, context)?);
        if fields.is_empty() {
            return Err(BundleError::MissingLabel(format!("{context} exchange")));
        }
        out.push(ExchangeUpdate {
            match_kind: MatchKind::parse(&exchange.match_kind),
            fields,
        });
    }
    Ok(out)
}

struct FieldParts {
    label: Option<String>,
    value: Option<Value>,
    overwrite: bool,
    path: Option<SchemaPath>,
    kind: Option<ValueKind>,
    reference: Option<ReferenceKind>,
}

fn build_update(
    parts: FieldParts,
    catalog: &FieldCatalog,
    scope: Scope,
    context: &str,
) -> Result<FieldUpdate, BundleError> {
    let label = parts
        .label
        .map(|label| label.trim().to_string())
        .filter(|label| !label.is_empty())
        .ok_or_else(|| BundleError::MissingLabel(context.to_string()))?;
    let value = match parts.value {
        None | Some(Value::Null) => return Err(BundleError::MissingValue(label)),
        Some(value) => value,
    };
    let invalid = |reason: String| BundleError::InvalidField {
        label: label.clone(),
        reason,
    };
    if value.is_array() {
        return Err(invalid("value must be a scalar or a mapping".into()));
    }

    let (schema_path, kind, reference) = match (parts.path, scope.spec(catalog, &label)) {
        (Some(path), _) => {
            let kind = parts
                .kind
                .ok_or_else(|| invalid("explicit 'path' needs an explicit 'kind'".into()))?;
            path.layout().map_err(|err| invalid(err.to_string()))?;
            (path, kind, parts.reference)
        }
        (None, Some(spec)) => (
            spec.path.clone(),
            parts.kind.unwrap_or(spec.kind),
            parts.reference.or(spec.reference),
        ),
        (None, None) => {
            debug!(label = %label, context, "label not in field catalog");
            let kind = parts.kind.unwrap_or_else(|| infer_kind(&value));
            (SchemaPath::default(), kind, parts.reference)
        }
    };

    let value = shape_value(value, kind, reference).map_err(invalid)?;
    Ok(FieldUpdate {
        label,
        schema_path,
        value_kind: kind,
        value,
        overwrite: parts.overwrite,
    })
}

fn infer_kind(value: &Value) -> ValueKind {
    match value {
        Value::Object(_) => ValueKind::Multilingual,
        Value::Bool(_) => ValueKind::Boolean,
        _ => ValueKind::Plain,
    }
}

/// Shape a raw YAML value for its value kind.
fn shape_value(
    value: Value,
    kind: ValueKind,
    reference: Option<ReferenceKind>,
) -> Result<FieldValue, String> {
    match kind {
        ValueKind::Reference => reference_value(value, reference).map(FieldValue::Reference),
        ValueKind::Multilingual => {
            let pairs = match value {
                Value::Object(map) => map
                    .into_iter()
                    .filter_map(|(lang, text)| {
                        scalar_text(&text).map(|text| (lang.trim().to_string(), text))
                    })
                    .filter(|(_, text)| !text.is_empty())
                    .collect::<Vec<_>>(),
                other => scalar_text(&other)
                    .filter(|text| !text.is_empty())
                    .map(|text| vec![(DEFAULT_LANGUAGE.to_string(), text)])
                    .unwrap_or_default(),
            };
            if pairs.is_empty() {
                return Err("at least one language entry is required".into());
            }
            Ok(FieldValue::Languages(pairs))
        }
        ValueKind::Plain | ValueKind::Enum | ValueKind::Boolean => match value {
            Value::Object(_) => Err(format!("{kind} value must be a scalar")),
            scalar => Ok(FieldValue::Scalar(scalar)),
        },
    }
}

fn reference_value(
    value: Value,
    default_kind: Option<ReferenceKind>,
) -> Result<ReferenceDescriptor, String> {
    let (kind, id) = match &value {
        Value::Object(map) => {
            let kind = match map.get("kind").and_then(Value::as_str) {
                Some(raw) => Some(raw.parse::<ReferenceKind>().map_err(|err| err.to_string())?),
                None => default_kind,
            };
            (kind, map.get("id").and_then(scalar_text))
        }
        other => (default_kind, scalar_text(other)),
    };
    let kind = kind.ok_or("reference value needs a kind")?;
    let id = id
        .filter(|id| !id.is_empty())
        .ok_or("reference value needs an id")?;
    let external_id = Uuid::parse_str(&id)
        .map_err(|_| format!("reference id '{id}' is not a UUID"))?
        .to_string();
    Ok(ReferenceDescriptor { kind, external_id })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
