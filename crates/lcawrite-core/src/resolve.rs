//! Which rules of a bundle apply to a given document.
//!
//! Exactly one path is taken per document: a binding by id wins outright,
//! otherwise the composite process name is matched against the bundle's name
//! rules, otherwise only the global rules apply.

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::audit::{Decision, DocumentAudit};
use crate::multilang;
use crate::requirement::{ExchangeUpdate, FieldUpdate, NameRule, RequirementBundle, RuleSet};
use crate::tree;

/// Joins the parts of a composite process name.
pub const NAME_SEPARATOR: &str = "; ";

/// Name parts under `processInformation/dataSetInformation/name`, in key order.
const NAME_PARTS: [&str; 4] = [
    "baseName",
    "treatmentStandardsRoutes",
    "mixAndLocationTypes",
    "functionalUnitFlowProperties",
];

/// Audit label for resolution decisions.
const NAME_FIELD: &str = "process name";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionPath {
    Bound { template: String },
    Named { process_name: String },
    GlobalOnly,
}

/// Ordered updates selected for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub path: ResolutionPath,
    pub fields: Vec<FieldUpdate>,
    pub exchanges: Vec<ExchangeUpdate>,
    /// Composite name keys derived from the document.
    pub name_keys: Vec<String>,
}

enum NameMatch<'b> {
    Confident(&'b NameRule),
    LowConfidence(&'b NameRule, String),
    None,
}

impl RequirementBundle {
    /// Select the updates for `document_id`, global rules first.
    pub fn resolve(
        &self,
        document_id: &str,
        document: &Value,
        audit: &mut DocumentAudit<'_>,
    ) -> Resolution {
        let name_keys = derive_name_keys(document);

        if let Some(template) = self.bindings.get(document_id) {
            match self.templates.get(template) {
                Some(rules) => {
                    debug!(document_id, template = %template, "bound template");
                    return self.assemble(
                        ResolutionPath::Bound {
                            template: template.clone(),
                        },
                        Some(rules.clone()),
                        name_keys,
                    );
                }
                None => {
                    audit.record(
                        NAME_FIELD,
                        Decision::SkippedUnmapped,
                        format!("binding names unknown template '{template}'; global rules only"),
                    );
                    return self.assemble(ResolutionPath::GlobalOnly, None, name_keys);
                }
            }
        }

        match self.match_name(&name_keys) {
            NameMatch::Confident(rule) => {
                debug!(document_id, process_name = %rule.process_name, "matched process rule");
                self.assemble(
                    ResolutionPath::Named {
                        process_name: rule.process_name.clone(),
                    },
                    Some(rule.rules.clone()),
                    name_keys,
                )
            }
            NameMatch::LowConfidence(rule, key) => {
                audit.record(
                    NAME_FIELD,
                    Decision::SkippedLowConfidence,
                    format!(
                        "'{key}' only partially matches process rule '{}'; rule not applied",
                        rule.process_name
                    ),
                );
                self.assemble(ResolutionPath::GlobalOnly, None, name_keys)
            }
            NameMatch::None => {
                let derived = if name_keys.is_empty() {
                    "<no process name>".to_string()
                } else {
                    name_keys.join(" | ")
                };
                audit.record(
                    NAME_FIELD,
                    Decision::SkippedUnmapped,
                    format!("no process rule for '{derived}'; global rules only"),
                );
                self.assemble(ResolutionPath::GlobalOnly, None, name_keys)
            }
        }
    }

    fn assemble(
        &self,
        path: ResolutionPath,
        selected: Option<RuleSet>,
        name_keys: Vec<String>,
    ) -> Resolution {
        let mut fields = self.global_rules.clone();
        let mut exchanges = self.exchange_rules.clone();
        if let Some(rules) = selected {
            fields.extend(rules.fields);
            exchanges.extend(rules.exchanges);
        }
        Resolution {
            path,
            fields: dedup_keep_last(fields),
            exchanges: dedup_keep_last(exchanges),
            name_keys,
        }
    }

    fn match_name(&self, keys: &[String]) -> NameMatch<'_> {
        let normalised: Vec<String> = keys.iter().map(|key| normalise_name(key)).collect();
        let mut partial = None;
        for rule in &self.name_rules {
            let wanted = normalise_name(&rule.process_name);
            if wanted.is_empty() {
                continue;
            }
            for (key, candidate) in keys.iter().zip(&normalised) {
                if candidate.is_empty() {
                    continue;
                }
                if names_match(&wanted, candidate) {
                    return NameMatch::Confident(rule);
                }
                if partial.is_none() && overlaps(&wanted, candidate) {
                    partial = Some((rule, key.clone()));
                }
            }
        }
        match partial {
            Some((rule, key)) => NameMatch::LowConfidence(rule, key),
            None => NameMatch::None,
        }
    }
}

/// Composite name keys for a document, one per base-name language in canonical
/// order. Qualifiers use the same language, falling back to their first entry.
pub fn derive_name_keys(document: &Value) -> Vec<String> {
    let root = tree::process_root(document);
    let name = match tree::lookup(root, &["processInformation", "dataSetInformation", "name"]) {
        Ok(Some(name)) => name,
        _ => return Vec::new(),
    };
    let name = match name {
        Value::Array(items) if items.len() == 1 => &items[0],
        other => other,
    };
    let part = |key: &str| name.get(key).cloned().unwrap_or(Value::Null);

    let mut bases = multilang::canonical_pairs(&multilang::entries(&part(NAME_PARTS[0])));
    if bases.is_empty() {
        bases.push((multilang::DEFAULT_LANGUAGE.to_string(), String::new()));
    }

    let mut keys: Vec<String> = Vec::new();
    for (lang, base) in bases {
        let mut segments = vec![base.trim().to_string()];
        for qualifier in &NAME_PARTS[1..] {
            let text = multilang::text_for(&part(*qualifier), &lang).unwrap_or_default();
            segments.push(text.trim().to_string());
        }
        while segments.last().is_some_and(String::is_empty) {
            segments.pop();
        }
        let key = segments.join(NAME_SEPARATOR);
        if !key.is_empty() && !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// Lowercase, collapse whitespace and drop empty `;` segments.
pub fn normalise_name(name: &str) -> String {
    name.split(';')
        .map(|segment| {
            segment
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase()
        })
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(NAME_SEPARATOR)
}

/// Exact or `*` wildcard match of two normalised names.
fn names_match(wanted: &str, candidate: &str) -> bool {
    if wanted == candidate {
        return true;
    }
    if !wanted.contains('*') {
        return false;
    }
    let pattern = format!("^{}$", regex::escape(wanted).replace(r"\*", ".*"));
    Regex::new(&pattern).is_ok_and(|re| re.is_match(candidate))
}

/// Containment in either direction, whole or segment by segment.
fn overlaps(wanted: &str, candidate: &str) -> bool {
    if wanted.contains(candidate) || candidate.contains(wanted) {
        return true;
    }
    let segments_within = |from: &str, within: &str| {
        let mut segments = from.split(';').map(str::trim).filter(|s| !s.is_empty()).peekable();
        segments.peek().is_some() && segments.all(|segment| within.contains(segment))
    };
    segments_within(wanted, candidate) || segments_within(candidate, wanted)
}

/// Remove duplicates, keeping the last occurrence of each.
fn dedup_keep_last<T: PartialEq>(items: Vec<T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items.into_iter().rev() {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out.reverse();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::catalog::ValueKind;
    use crate::path::SchemaPath;
    use crate::requirement::{FieldValue, MatchKind};
    use serde_json::json;

    fn plain(label: &str, path: &[&str], value: &str) -> FieldUpdate {
        FieldUpdate::new(
            label,
            SchemaPath::parse(path.iter().copied()),
            ValueKind::Plain,
            FieldValue::Scalar(json!(value)),
        )
    }

    fn rules(fields: Vec<FieldUpdate>) -> RuleSet {
        RuleSet {
            fields,
            exchanges: Vec::new(),
        }
    }

    fn document(base: &str, treatment: &str) -> Value {
        json!({
            "processDataSet": {
                "processInformation": {
                    "dataSetInformation": {
                        "name": {
                            "baseName": [{"@xml:lang": "en", "#text": base}],
                            "treatmentStandardsRoutes": {"@xml:lang": "en", "#text": treatment}
                        }
                    }
                }
            }
        })
    }

    fn bundle() -> RequirementBundle {
        let mut bundle = RequirementBundle {
            global_rules: vec![plain("G", &["g"], "1")],
            ..Default::default()
        };
        bundle.name_rules.push(NameRule {
            process_name: "Steel billet; Hot rolling".into(),
            rules: rules(vec![plain("N", &["n"], "named")]),
        });
        bundle
            .templates
            .insert("cement".into(), rules(vec![plain("T", &["t"], "template")]));
        bundle.bindings.insert("doc-bound".into(), "cement".into());
        bundle
    }

    #[test]
    fn derives_key_per_language() {
        let doc = json!({
            "processInformation": {"dataSetInformation": {"name": {
                "baseName": [
                    {"@xml:lang": "zh", "#text": "钢坯"},
                    {"@xml:lang": "en", "#text": "Steel billet"}
                ],
                "treatmentStandardsRoutes": [{"@xml:lang": "en", "#text": "hot rolling"}],
                "mixAndLocationTypes": null
            }}}
        });
        assert_eq!(
            derive_name_keys(&doc),
            vec!["Steel billet; hot rolling".to_string(), "钢坯; hot rolling".to_string()]
        );
    }

    #[test]
    fn inner_empty_parts_are_kept_trailing_trimmed() {
        let doc = json!({"processInformation": {"dataSetInformation": {"name": {
            "baseName": {"#text": "A"},
            "mixAndLocationTypes": {"#text": "C"}
        }}}});
        assert_eq!(derive_name_keys(&doc), vec!["A; ; C".to_string()]);
        assert!(derive_name_keys(&json!({})).is_empty());
    }

    #[test]
    fn bound_template_wins_over_name_rules() {
        let bundle = bundle();
        let doc = document("Steel billet", "hot rolling");
        let mut log = AuditLog::new();

        let bound = bundle.resolve("doc-bound", &doc, &mut log.scope("doc-bound"));
        assert_eq!(
            bound.path,
            ResolutionPath::Bound {
                template: "cement".into()
            }
        );
        let labels: Vec<_> = bound.fields.iter().map(|f| f.label.as_str()).collect();
        assert_eq!(labels, ["G", "T"]);

        let named = bundle.resolve("doc-other", &doc, &mut log.scope("doc-other"));
        let labels: Vec<_> = named.fields.iter().map(|f| f.label.as_str()).collect();
        assert_eq!(labels, ["G", "N"]);
        assert!(log.is_empty());
    }

    #[test]
    fn resolution_does_not_alias_templates() {
        let bundle = bundle();
        let mut log = AuditLog::new();
        let mut first = bundle.resolve("doc-bound", &json!({}), &mut log.scope("doc-bound"));
        first.fields[1].label = "mutated".into();
        let second = bundle.resolve("doc-bound", &json!({}), &mut log.scope("doc-bound"));
        assert_eq!(second.fields[1].label, "T");
        assert_eq!(bundle.templates["cement"].fields[0].label, "T");
    }

    #[test]
    fn wildcard_and_whitespace_insensitive_match() {
        let mut bundle = bundle();
        bundle.name_rules[0].process_name = "steel *;   HOT rolling".into();
        let mut log = AuditLog::new();
        let doc = document("Steel  billet", "hot rolling");
        let resolution = bundle.resolve("d", &doc, &mut log.scope("d"));
        assert!(matches!(resolution.path, ResolutionPath::Named { .. }));
    }

    #[test]
    fn partial_match_is_low_confidence() {
        let bundle = bundle();
        let mut log = AuditLog::new();
        let doc = document("Steel billet", "");
        let resolution = bundle.resolve("d", &doc, &mut log.scope("d"));
        assert_eq!(resolution.path, ResolutionPath::GlobalOnly);
        assert_eq!(resolution.fields.len(), 1);
        assert_eq!(log.count(Decision::SkippedLowConfidence), 1);
    }

    #[test]
    fn unmatched_name_is_audited_with_key() {
        let bundle = bundle();
        let mut log = AuditLog::new();
        let doc = document("Cement clinker", "kiln");
        let resolution = bundle.resolve("d", &doc, &mut log.scope("d"));
        assert_eq!(resolution.path, ResolutionPath::GlobalOnly);
        assert_eq!(log.count(Decision::SkippedUnmapped), 1);
        assert!(log.entries()[0].reason.contains("Cement clinker; kiln"));
    }

    #[test]
    fn no_name_rules_still_audits_derived_name() {
        let bundle = RequirementBundle {
            global_rules: vec![plain("G", &["g"], "1")],
            ..Default::default()
        };
        let mut log = AuditLog::new();
        let doc = document("Cement clinker", "");
        let resolution = bundle.resolve("d", &doc, &mut log.scope("d"));
        assert_eq!(resolution.path, ResolutionPath::GlobalOnly);
        assert_eq!(resolution.name_keys, vec!["Cement clinker"]);
        assert_eq!(resolution.fields.len(), 1);
        assert_eq!(log.count(Decision::SkippedUnmapped), 1);
        assert!(log.entries()[0].reason.contains("Cement clinker"));
    }

    #[test]
    fn nameless_document_is_audited() {
        let bundle = RequirementBundle::default();
        let mut log = AuditLog::new();
        bundle.resolve("d", &json!({}), &mut log.scope("d"));
        assert_eq!(log.count(Decision::SkippedUnmapped), 1);
        assert!(log.entries()[0].reason.contains("<no process name>"));
    }

    #[test]
    fn unknown_binding_falls_back_to_global() {
        let mut bundle = bundle();
        bundle.bindings.insert("d".into(), "missing".into());
        let mut log = AuditLog::new();
        let doc = document("Steel billet", "hot rolling");
        let resolution = bundle.resolve("d", &doc, &mut log.scope("d"));
        assert_eq!(resolution.path, ResolutionPath::GlobalOnly);
        assert_eq!(log.count(Decision::SkippedUnmapped), 1);
    }

    #[test]
    fn duplicates_keep_last_occurrence() {
        let mut bundle = bundle();
        bundle.global_rules.push(plain("X", &["x"], "1"));
        bundle.name_rules[0].rules.fields.push(plain("G", &["g"], "1"));
        bundle.exchange_rules.push(ExchangeUpdate {
            match_kind: MatchKind::All,
            fields: vec![plain("E", &["e"], "1")],
        });
        let mut log = AuditLog::new();
        let doc = document("Steel billet", "hot rolling");
        let resolution = bundle.resolve("d", &doc, &mut log.scope("d"));
        let labels: Vec<_> = resolution.fields.iter().map(|f| f.label.as_str()).collect();
        assert_eq!(labels, ["X", "N", "G"]);
        assert_eq!(resolution.exchanges.len(), 1);
    }

    #[test]
    fn normalise_name_collapses_segments() {
        assert_eq!(
            normalise_name("  Steel   Billet ;; Hot\trolling "),
            "steel billet; hot rolling"
        );
    }
}
