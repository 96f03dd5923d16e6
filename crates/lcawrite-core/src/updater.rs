//! The merge engine: writes resolved field updates into a process document.
//!
//! Every update either lands completely or is skipped with an audit entry; a
//! single bad update never fails the document. Normalization always runs last.

use serde_json::Value;
use tracing::debug;

use crate::audit::{Decision, DocumentAudit};
use crate::catalog::{EnumTable, ValueKind};
use crate::multilang::{self, TEXT_KEY};
use crate::normalize;
use crate::path::PathLayout;
use crate::reference::ReferenceResolver;
use crate::requirement::{ExchangeUpdate, FieldUpdate, FieldValue, MatchKind};
use crate::translation::TranslationIndex;
use crate::tree;

/// Audit reason when `overwrite` is off and the destination already holds data.
pub const EXISTING_PRESERVED: &str = "existing value preserved";

const TRUE_WORDS: [&str; 5] = ["true", "yes", "y", "1", "是"];
const FALSE_WORDS: [&str; 5] = ["false", "no", "n", "0", "否"];

pub struct DocumentUpdater<'a> {
    translations: &'a dyn TranslationIndex,
    enums: &'a EnumTable,
    references: &'a ReferenceResolver<'a>,
}

impl<'a> DocumentUpdater<'a> {
    pub fn new(
        translations: &'a dyn TranslationIndex,
        enums: &'a EnumTable,
        references: &'a ReferenceResolver<'a>,
    ) -> Self {
        Self {
            translations,
            enums,
            references,
        }
    }

    /// Apply `fields` at the process root and `exchanges` to each matched
    /// exchange entry, then normalize. Mutates in place.
    pub fn apply<'d>(
        &self,
        document: &'d mut Value,
        fields: &[FieldUpdate],
        exchanges: &[ExchangeUpdate],
        audit: &mut DocumentAudit<'_>,
    ) -> &'d mut Value {
        if !document.is_object() {
            audit.record(
                "document",
                Decision::SkippedUnmapped,
                format!(
                    "document is {}, not an object; nothing applied",
                    tree::kind_name(document)
                ),
            );
            return document;
        }
        debug!(
            document_id = audit.document_id(),
            fields = fields.len(),
            exchanges = exchanges.len(),
            "applying updates"
        );

        let root = tree::process_root_mut(document);
        for update in fields {
            self.apply_field(root, update, &update.label, audit);
        }
        self.apply_exchanges(root, exchanges, audit);

        normalize::normalize(document, audit);
        document
    }

    fn apply_field(
        &self,
        root: &mut Value,
        update: &FieldUpdate,
        field: &str,
        audit: &mut DocumentAudit<'_>,
    ) {
        if !update.is_mapped() {
            audit.record(field, Decision::SkippedUnmapped, "no schema target for label");
            return;
        }
        match update.schema_path.layout() {
            Ok(PathLayout::Direct(keys)) => self.write_direct(root, &keys, update, field, audit),
            Ok(PathLayout::PerLanguage { prefix, suffix }) => {
                self.write_per_language(root, &prefix, &suffix, update, field, audit)
            }
            Err(err) => audit.record(
                field,
                Decision::SkippedUnmapped,
                format!("invalid path '{}': {err}", update.schema_path),
            ),
        }
    }

    fn write_direct(
        &self,
        root: &mut Value,
        keys: &[&str],
        update: &FieldUpdate,
        field: &str,
        audit: &mut DocumentAudit<'_>,
    ) {
        let Some((leaf, parents)) = keys.split_last() else {
            return;
        };
        let existing = match tree::lookup(root, keys) {
            Ok(found) => found.cloned(),
            Err(err) => {
                audit.record(field, Decision::SkippedUnmapped, format!("path not writable: {err}"));
                return;
            }
        };
        if !update.overwrite && existing.as_ref().is_some_and(|value| !tree::is_blank(value)) {
            audit.record(field, Decision::SkippedUnmapped, EXISTING_PRESERVED);
            return;
        }
        let Some(value) = self.build_value(existing.as_ref(), update, field, audit) else {
            return;
        };
        match tree::ensure_object(root, parents) {
            Ok(parent) => {
                parent.insert(leaf.to_string(), value.clone());
                record_write(audit, field, existing, value);
            }
            Err(err) => audit.record(
                field,
                Decision::SkippedUnmapped,
                format!("path not writable: {err}"),
            ),
        }
    }

    /// Write one text per language into the entry list at `prefix`, walking
    /// `suffix` inside each entry (or writing `#text` when it is empty).
    fn write_per_language(
        &self,
        root: &mut Value,
        prefix: &[&str],
        suffix: &[&str],
        update: &FieldUpdate,
        field: &str,
        audit: &mut DocumentAudit<'_>,
    ) {
        let pairs = match (&update.value_kind, &update.value) {
            (ValueKind::Multilingual, FieldValue::Languages(pairs)) => {
                multilang::canonical_pairs(pairs)
            }
            _ => {
                audit.record(
                    field,
                    Decision::SkippedUnmapped,
                    "per-language path needs a multilingual value",
                );
                return;
            }
        };
        let Some((leaf, parents)) = prefix.split_last() else {
            return;
        };
        let target: Vec<&str> = if suffix.is_empty() {
            vec![TEXT_KEY]
        } else {
            suffix.to_vec()
        };

        // Check every language before touching anything.
        let slot = match tree::lookup(root, prefix) {
            Ok(slot) => slot,
            Err(err) => {
                audit.record(field, Decision::SkippedUnmapped, format!("path not writable: {err}"));
                return;
            }
        };
        if let Some(blocker) =
            slot.filter(|slot| !matches!(slot, Value::Null | Value::Array(_) | Value::Object(_)))
        {
            audit.record(
                field,
                Decision::SkippedUnmapped,
                format!("path not writable: '{leaf}' holds {}", tree::kind_name(blocker)),
            );
            return;
        }
        for (lang, _) in &pairs {
            if let Some(entry) = slot.and_then(|slot| find_language(slot, lang))
                && let Err(err) = tree::lookup(entry, &target)
            {
                audit.record(
                    format!("{field} [{lang}]"),
                    Decision::SkippedUnmapped,
                    format!("path not writable: {err}"),
                );
                return;
            }
        }

        let parent = match tree::ensure_object(root, parents) {
            Ok(parent) => parent,
            Err(err) => {
                audit.record(field, Decision::SkippedUnmapped, format!("path not writable: {err}"));
                return;
            }
        };
        let slot = parent
            .entry(leaf.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        upgrade_to_list(slot);
        let Value::Array(items) = slot else {
            return;
        };

        let (inner_leaf, inner_parents) = match target.split_last() {
            Some(split) => split,
            None => return,
        };
        for (lang, text) in &pairs {
            let label = format!("{field} [{lang}]");
            let index = match items.iter().position(|item| is_language(item, lang)) {
                Some(index) => index,
                None => {
                    items.push(multilang::blank_entry(lang));
                    items.len() - 1
                }
            };
            let entry = &mut items[index];
            let existing = tree::lookup(entry, &target).ok().flatten().cloned();
            if !update.overwrite && existing.as_ref().is_some_and(|value| !tree::is_blank(value)) {
                audit.record(label, Decision::SkippedUnmapped, EXISTING_PRESERVED);
                continue;
            }
            let value = Value::String(text.clone());
            match tree::ensure_object(entry, inner_parents) {
                Ok(container) => {
                    container.insert(inner_leaf.to_string(), value.clone());
                    record_write(audit, &label, existing, value);
                }
                Err(err) => audit.record(
                    label,
                    Decision::SkippedUnmapped,
                    format!("path not writable: {err}"),
                ),
            }
        }
        multilang::sort_entries(items);
    }

    fn apply_exchanges(
        &self,
        root: &mut Value,
        exchanges: &[ExchangeUpdate],
        audit: &mut DocumentAudit<'_>,
    ) {
        let mut supported = Vec::with_capacity(exchanges.len());
        for exchange in exchanges {
            match &exchange.match_kind {
                MatchKind::All => supported.push(exchange),
                MatchKind::Unsupported(kind) => {
                    for update in &exchange.fields {
                        audit.record(
                            format!("exchange {}", update.label),
                            Decision::SkippedUnmapped,
                            format!("unsupported exchange match kind '{kind}'"),
                        );
                    }
                }
            }
        }
        if supported.is_empty() {
            return;
        }

        let Some(slot) = tree::get_mut(root, &["exchanges", "exchange"]) else {
            audit.record(
                "exchanges",
                Decision::SkippedUnmapped,
                "document has no exchange list; exchange updates not applied",
            );
            return;
        };
        if slot.is_object() {
            let single = slot.take();
            *slot = Value::Array(vec![single]);
        }
        let found = tree::kind_name(slot);
        let Value::Array(entries) = slot else {
            audit.record(
                "exchanges",
                Decision::SkippedUnmapped,
                format!("exchange list is {found}; exchange updates not applied"),
            );
            return;
        };
        if entries.is_empty() {
            debug!(document_id = audit.document_id(), "no exchanges to update");
        }
        for (index, entry) in entries.iter_mut().enumerate() {
            if !entry.is_object() {
                audit.record(
                    format!("exchange[{index}]"),
                    Decision::SkippedUnmapped,
                    format!("exchange entry is {}", tree::kind_name(entry)),
                );
                continue;
            }
            for exchange in &supported {
                for update in &exchange.fields {
                    let field = format!("exchange[{index}] {}", update.label);
                    self.apply_field(entry, update, &field, audit);
                }
            }
        }
    }

    /// Shape the update's value for the document. `None` when the update has
    /// been skipped (and audited).
    fn build_value(
        &self,
        existing: Option<&Value>,
        update: &FieldUpdate,
        field: &str,
        audit: &mut DocumentAudit<'_>,
    ) -> Option<Value> {
        match (update.value_kind, &update.value) {
            (ValueKind::Plain, FieldValue::Scalar(value)) => Some(value.clone()),
            (ValueKind::Multilingual, FieldValue::Languages(pairs)) => {
                Some(multilang::merge(existing, pairs))
            }
            (ValueKind::Boolean, FieldValue::Scalar(value)) => match parse_bool(value) {
                Some(flag) => Some(Value::String(flag.to_string())),
                None => {
                    audit.record(
                        field,
                        Decision::SkippedUnmapped,
                        format!("cannot read {value} as a boolean"),
                    );
                    None
                }
            },
            (ValueKind::Enum, FieldValue::Scalar(_)) => {
                let text = update.value.as_text().unwrap_or_default();
                let enumerant = self.translations.lookup(&text).and_then(|key| {
                    let field_key = update.schema_path.leaf_key()?;
                    self.enums.enumerant(field_key, key)
                });
                match enumerant {
                    Some(enumerant) => Some(Value::String(enumerant.to_string())),
                    None => {
                        audit.record(
                            field,
                            Decision::SkippedUnmapped,
                            format!("no enumeration value for '{text}'"),
                        );
                        None
                    }
                }
            }
            (ValueKind::Reference, FieldValue::Reference(descriptor)) => {
                Some(self.references.resolve(descriptor, field, audit).to_value())
            }
            (kind, value) => {
                audit.record(
                    field,
                    Decision::SkippedUnmapped,
                    format!("{kind} field cannot take {}", shape_name(value)),
                );
                None
            }
        }
    }
}

fn find_language<'v>(slot: &'v Value, lang: &str) -> Option<&'v Value> {
    match slot {
        Value::Array(items) => items.iter().find(|item| is_language(item, lang)),
        Value::Object(_) if is_language(slot, lang) => Some(slot),
        _ => None,
    }
}

fn is_language(entry: &Value, lang: &str) -> bool {
    multilang::language_of(entry).is_some_and(|code| multilang::same_language(code, lang))
}

/// Turn a null or single-entry slot into a list of entries.
fn upgrade_to_list(slot: &mut Value) {
    match slot {
        Value::Null => *slot = Value::Array(Vec::new()),
        Value::Object(_) => {
            let single = slot.take();
            *slot = if tree::is_blank(&single) {
                Value::Array(Vec::new())
            } else {
                Value::Array(vec![single])
            };
        }
        _ => {}
    }
}

fn record_write(audit: &mut DocumentAudit<'_>, field: &str, before: Option<Value>, after: Value) {
    match before {
        Some(before) if before == after => {
            audit.record(field, Decision::Applied, "value unchanged")
        }
        Some(before) if !tree::is_blank(&before) => audit.record_change(
            field,
            Decision::Overwritten,
            "existing value replaced",
            Some(before),
            Some(after),
        ),
        _ => audit.record_change(field, Decision::Applied, "value written", None, Some(after)),
    }
}

pub fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(text) => {
            let word = text.trim().to_lowercase();
            if TRUE_WORDS.contains(&word.as_str()) {
                Some(true)
            } else if FALSE_WORDS.contains(&word.as_str()) {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn shape_name(value: &FieldValue) -> &'static str {
    match value {
        FieldValue::Scalar(_) => "a scalar value",
        FieldValue::Languages(_) => "language entries",
        FieldValue::Reference(_) => "a reference",
    }
}
