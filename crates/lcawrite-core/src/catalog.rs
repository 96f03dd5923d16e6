//! Field catalog: which requirement labels the engine understands, and where
//! in the process document each one is written.
//!
//! The catalog is data, not code. A default catalog is compiled in from
//! `data/field_catalog.yaml`; a replacement can be loaded at run time.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::path::SchemaPath;
use crate::reference::ReferenceKind;

const BUILTIN_CATALOG: &str = include_str!("../data/field_catalog.yaml");

/// Separator between a section prefix and the field name in UI labels
/// (`管理信息——许可类型`).
pub const SECTION_SEPARATOR: &str = "——";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Plain,
    #[serde(alias = "multilang")]
    Multilingual,
    Reference,
    Enum,
    #[serde(alias = "bool")]
    Boolean,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plain => "plain",
            Self::Multilingual => "multilingual",
            Self::Reference => "reference",
            Self::Enum => "enum",
            Self::Boolean => "boolean",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub path: SchemaPath,
    pub kind: ValueKind,
    /// Target kind of `reference` fields.
    pub reference: Option<ReferenceKind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub label: String,
    pub aliases: Vec<String>,
    pub spec: FieldSpec,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read field catalog '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid field catalog: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("catalog field '{label}': {reason}")]
    Invalid { label: String, reason: String },

    #[error("label '{0}' is defined more than once")]
    Duplicate(String),
}

/// Strip a leading section prefix and surrounding whitespace from a label.
pub fn normalise_label(label: &str) -> &str {
    label
        .rsplit_once(SECTION_SEPARATOR)
        .map_or(label, |(_, name)| name)
        .trim()
}

fn lookup_key(label: &str) -> String {
    normalise_label(label).to_lowercase()
}

// ── Enumerations ──

/// Schema-legal enumerants per enum field, keyed by the field's final path key
/// without any `common:` prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumTable {
    fields: HashMap<String, BTreeMap<String, String>>,
}

impl EnumTable {
    pub fn insert(&mut self, field_key: &str, enumerants: BTreeMap<String, String>) {
        self.fields.insert(bare_key(field_key).to_string(), enumerants);
    }

    /// Map a translation key such as
    /// `pages.process.view.administrativeInformation.licenseType.licenseFee`
    /// to the enumerant for `field_key`. The key must belong to that field:
    /// its second-to-last segment has to equal the field key.
    pub fn enumerant(&self, field_key: &str, canonical_key: &str) -> Option<&str> {
        let field = bare_key(field_key);
        let mut segments = canonical_key.rsplit('.');
        let suffix = segments.next()?;
        if segments.next()? != field {
            return None;
        }
        self.fields.get(field)?.get(suffix).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn bare_key(key: &str) -> &str {
    key.strip_prefix("common:").unwrap_or(key)
}

// ── Catalog ──

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCatalog {
    #[serde(default)]
    fields: Vec<RawField>,
    #[serde(default)]
    exchange_fields: Vec<RawField>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawField {
    label: String,
    #[serde(default)]
    aliases: Vec<String>,
    path: SchemaPath,
    kind: ValueKind,
    #[serde(default)]
    reference: Option<ReferenceKind>,
    #[serde(default)]
    enumerants: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct FieldCatalog {
    fields: Vec<CatalogEntry>,
    exchange_fields: Vec<CatalogEntry>,
    field_index: HashMap<String, usize>,
    exchange_index: HashMap<String, usize>,
    enums: EnumTable,
}

impl FieldCatalog {
    /// The catalog compiled into the crate.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_yaml_str(BUILTIN_CATALOG)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_yaml_str(&text)?;
        debug!(
            path = %path.display(),
            fields = catalog.fields.len(),
            exchange_fields = catalog.exchange_fields.len(),
            "loaded field catalog"
        );
        Ok(catalog)
    }

    pub fn from_yaml_str(src: &str) -> Result<Self, CatalogError> {
        let raw: RawCatalog = serde_yaml::from_str(src)?;
        let mut catalog = Self::default();
        for field in raw.fields {
            let entry = catalog.check(field)?;
            insert(&mut catalog.fields, &mut catalog.field_index, entry)?;
        }
        for field in raw.exchange_fields {
            let entry = catalog.check(field)?;
            insert(&mut catalog.exchange_fields, &mut catalog.exchange_index, entry)?;
        }
        Ok(catalog)
    }

    /// Validate one raw field, registering its enumerants.
    fn check(&mut self, raw: RawField) -> Result<CatalogEntry, CatalogError> {
        let invalid = |reason: String| CatalogError::Invalid {
            label: raw.label.clone(),
            reason,
        };
        raw.path.layout().map_err(|err| invalid(err.to_string()))?;
        if raw.path.has_language_marker() && raw.kind != ValueKind::Multilingual {
            return Err(invalid(format!(
                "language marker is only valid for multilingual fields, not {}",
                raw.kind
            )));
        }
        match raw.kind {
            ValueKind::Reference if raw.reference.is_none() => {
                return Err(invalid("reference field needs a 'reference' kind".into()));
            }
            ValueKind::Enum => {
                if raw.enumerants.is_empty() {
                    return Err(invalid("enum field needs 'enumerants'".into()));
                }
                let leaf = raw
                    .path
                    .leaf_key()
                    .ok_or_else(|| invalid("path has no object key".into()))?;
                self.enums.insert(leaf, raw.enumerants.clone());
            }
            _ => {}
        }
        Ok(CatalogEntry {
            label: raw.label,
            aliases: raw.aliases,
            spec: FieldSpec {
                path: raw.path,
                kind: raw.kind,
                reference: raw.reference,
            },
        })
    }

    /// Spec for a document-rooted field label.
    pub fn field(&self, label: &str) -> Option<&FieldSpec> {
        let index = self.field_index.get(&lookup_key(label))?;
        Some(&self.fields[*index].spec)
    }

    /// Spec for an exchange-rooted field label.
    pub fn exchange_field(&self, label: &str) -> Option<&FieldSpec> {
        let index = self.exchange_index.get(&lookup_key(label))?;
        Some(&self.exchange_fields[*index].spec)
    }

    pub fn fields(&self) -> &[CatalogEntry] {
        &self.fields
    }

    pub fn exchange_fields(&self) -> &[CatalogEntry] {
        &self.exchange_fields
    }

    /// Every entry, document and exchange fields together, sorted by label.
    pub fn labels(&self) -> Vec<&CatalogEntry> {
        let mut entries: Vec<&CatalogEntry> =
            self.fields.iter().chain(&self.exchange_fields).collect();
        entries.sort_by(|a, b| a.label.cmp(&b.label));
        entries
    }

    pub fn enums(&self) -> &EnumTable {
        &self.enums
    }
}

fn insert(
    entries: &mut Vec<CatalogEntry>,
    index: &mut HashMap<String, usize>,
    entry: CatalogEntry,
) -> Result<(), CatalogError> {
    let position = entries.len();
    let names = std::iter::once(&entry.label).chain(entry.aliases.iter());
    for name in names {
        if index.insert(lookup_key(name), position).is_some() {
            return Err(CatalogError::Duplicate(name.clone()));
        }
    }
    entries.push(entry);
    Ok(())
}
