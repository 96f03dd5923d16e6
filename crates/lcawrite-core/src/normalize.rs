//! Document hygiene applied after every update pass.
//!
//! These repairs do not depend on the requirement bundle. Each rule is a
//! fixed point: running normalization on its own output changes nothing.

use serde_json::{Map, Value, json};

use crate::audit::{Decision, DocumentAudit};
use crate::tree;

/// Review type written when a document has none.
pub const NOT_REVIEWED: &str = "Not reviewed";
/// Fill-in for empty review scope and method names.
pub const DEFAULT_REVIEW_SCOPE: &str = "Documentation";
/// Compliance system every process declares (EF 3.1).
pub const DEFAULT_COMPLIANCE_ID: &str = "c84c4185-d1b0-44fc-823e-d2ec630c7906";

const VALIDATION: [&str; 2] = ["modellingAndValidation", "validation"];
const COMPLIANCE: [&str; 2] = ["modellingAndValidation", "complianceDeclarations"];
const COMPLIANCE_REF: &str = "common:referenceToComplianceSystem";

/// Review fields that only make sense for a reviewed data set.
const REVIEW_DETAILS: [&str; 8] = [
    "common:scope",
    "scope",
    "common:reviewDetails",
    "reviewDetails",
    "common:referenceToNameOfReviewerAndInstitution",
    "referenceToNameOfReviewerAndInstitution",
    "common:referenceToCompleteReviewReport",
    "referenceToCompleteReviewReport",
];

const COMPLIANCE_DEFAULTS: [(&str, &str); 6] = [
    ("common:approvalOfOverallCompliance", "Fully compliant"),
    ("common:nomenclatureCompliance", "Fully compliant"),
    ("common:methodologicalCompliance", "Not defined"),
    ("common:reviewCompliance", "Not defined"),
    ("common:documentationCompliance", "Not defined"),
    ("common:qualityCompliance", "Not defined"),
];

/// Stale references under `dataEntryBy` dropped when empty.
const STALE_ENTRY_REFS: [&str; 2] = [
    "common:referenceToConvertedOriginalDataSetFrom",
    "common:referenceToDataSetUseApproval",
];

pub fn normalize(document: &mut Value, audit: &mut DocumentAudit<'_>) {
    if !document.is_object() {
        return;
    }
    let root = tree::process_root_mut(document);
    reference_year(root, audit);
    prune_empty(root, audit);
    review(root, audit);
    compliance(root, audit);
    exchanges(root, audit);
}

fn reference_year(root: &mut Value, audit: &mut DocumentAudit<'_>) {
    let Some(year) = tree::get_mut(root, &["processInformation", "time", "common:referenceYear"])
    else {
        return;
    };
    let parsed = match year {
        Value::String(text) if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) => {
            text.parse::<u64>().ok()
        }
        _ => None,
    };
    if let Some(parsed) = parsed {
        let before = std::mem::replace(year, json!(parsed));
        changed(
            audit,
            "processInformation/time/common:referenceYear".into(),
            "reference year stored as a number",
            Some(before),
            Some(year.clone()),
        );
    }
}

fn prune_empty(root: &mut Value, audit: &mut DocumentAudit<'_>) {
    let targets: [(&[&str], &[&str]); 3] = [
        (&["administrativeInformation", "dataEntryBy"], &STALE_ENTRY_REFS),
        (
            &["administrativeInformation", "common:commissionerAndGoal"],
            &["common:intendedApplications"],
        ),
        (
            &["modellingAndValidation", "dataSourcesTreatmentAndRepresentativeness"],
            &["referenceToDataSource"],
        ),
    ];
    for (parent, keys) in targets {
        let Some(Value::Object(map)) = tree::get_mut(root, parent) else {
            continue;
        };
        for key in keys {
            if map.get(*key).is_some_and(tree::is_blank) {
                let before = map.shift_remove(*key);
                changed(
                    audit,
                    format!("{}/{key}", parent.join("/")),
                    "empty entry removed",
                    before,
                    None,
                );
            }
        }
    }
}

// ── Review ──

fn review(root: &mut Value, audit: &mut DocumentAudit<'_>) {
    let at = VALIDATION.join("/");
    let validation = match tree::ensure_object(root, &VALIDATION) {
        Ok(validation) => validation,
        Err(err) => {
            audit.record(at, Decision::SkippedUnmapped, format!("review not normalised: {err}"));
            return;
        }
    };
    let review = validation
        .entry("review")
        .or_insert_with(|| Value::Object(Map::new()));
    if review.is_null() {
        *review = Value::Object(Map::new());
    }
    match review {
        Value::Object(map) => review_entry(map, &format!("{at}/review"), audit),
        Value::Array(items) => {
            if items.is_empty() {
                items.push(Value::Object(Map::new()));
            }
            for (index, item) in items.iter_mut().enumerate() {
                if let Value::Object(map) = item {
                    review_entry(map, &format!("{at}/review[{index}]"), audit);
                }
            }
        }
        other => audit.record(
            format!("{at}/review"),
            Decision::SkippedUnmapped,
            format!("review is {}; not normalised", tree::kind_name(other)),
        ),
    }
}

fn review_entry(review: &mut Map<String, Value>, at: &str, audit: &mut DocumentAudit<'_>) {
    let current = review
        .get("@type")
        .and_then(Value::as_str)
        .map(|text| text.trim().to_string())
        .unwrap_or_default();
    let reviewed = if current.is_empty() {
        let before = review.insert("@type".into(), json!(NOT_REVIEWED));
        changed(
            audit,
            format!("{at}/@type"),
            "review type missing; marked not reviewed",
            before,
            Some(json!(NOT_REVIEWED)),
        );
        false
    } else {
        !current.eq_ignore_ascii_case(NOT_REVIEWED)
    };

    if !reviewed {
        for key in REVIEW_DETAILS {
            if let Some(before) = review.shift_remove(key) {
                audit.record_change(
                    format!("{at}/{key}"),
                    Decision::Overwritten,
                    "not reviewed; review detail removed",
                    Some(before),
                    None,
                );
            }
        }
        return;
    }

    let scope_key = ["common:scope", "scope"]
        .into_iter()
        .find(|key| review.get(*key).is_some_and(|scope| !tree::is_blank(scope)));
    match scope_key {
        Some(key) => {
            if let Some(scope) = review.get_mut(key) {
                fill_scope(scope, &format!("{at}/{key}"), audit);
            }
        }
        None => {
            let scope = default_scope();
            let before = review.insert("common:scope".into(), scope.clone());
            changed(
                audit,
                format!("{at}/common:scope"),
                "review scope missing; default inserted",
                before,
                Some(scope),
            );
        }
    }
}

fn default_scope() -> Value {
    json!({
        "@name": DEFAULT_REVIEW_SCOPE,
        "common:method": {"@name": DEFAULT_REVIEW_SCOPE},
    })
}

fn fill_scope(scope: &mut Value, at: &str, audit: &mut DocumentAudit<'_>) {
    match scope {
        Value::Object(map) => fill_scope_entry(map, at, audit),
        Value::Array(items) => {
            for (index, item) in items.iter_mut().enumerate() {
                if let Value::Object(map) = item {
                    fill_scope_entry(map, &format!("{at}[{index}]"), audit);
                }
            }
        }
        _ => {}
    }
}

fn fill_scope_entry(scope: &mut Map<String, Value>, at: &str, audit: &mut DocumentAudit<'_>) {
    fill_name(scope, &format!("{at}/@name"), audit);

    let method_key = ["common:method", "method"]
        .into_iter()
        .find(|key| scope.get(*key).is_some_and(|method| !tree::is_blank(method)));
    match method_key.and_then(|key| scope.get_mut(key).map(|method| (key, method))) {
        Some((key, Value::Object(method))) => {
            fill_name(method, &format!("{at}/{key}/@name"), audit)
        }
        Some((key, Value::Array(methods))) => {
            for (index, method) in methods.iter_mut().enumerate() {
                if let Value::Object(method) = method {
                    fill_name(method, &format!("{at}/{key}[{index}]/@name"), audit);
                }
            }
        }
        Some(_) => {}
        None => {
            let method = json!({"@name": DEFAULT_REVIEW_SCOPE});
            let before = scope.insert("common:method".into(), method.clone());
            changed(
                audit,
                format!("{at}/common:method"),
                "review method missing; default inserted",
                before,
                Some(method),
            );
        }
    }
}

fn fill_name(map: &mut Map<String, Value>, at: &str, audit: &mut DocumentAudit<'_>) {
    if map.get("@name").is_none_or(tree::is_blank) {
        let before = map.insert("@name".into(), json!(DEFAULT_REVIEW_SCOPE));
        changed(
            audit,
            at.to_string(),
            "empty name filled with default",
            before,
            Some(json!(DEFAULT_REVIEW_SCOPE)),
        );
    }
}

// ── Compliance ──

/// The compliance declaration added when none references the default system.
pub fn default_compliance() -> Value {
    let mut entry = Map::new();
    entry.insert(
        COMPLIANCE_REF.into(),
        json!({
            "@type": "Compliance system",
            "@refObjectId": DEFAULT_COMPLIANCE_ID,
            "@version": "01.00.000",
            "@uri": format!("https://tiangong.earth/datasets/{DEFAULT_COMPLIANCE_ID}"),
            "common:shortDescription": {
                "@xml:lang": "en",
                "#text": "Environmental Footprint (EF) 3.1"
            }
        }),
    );
    for (key, value) in COMPLIANCE_DEFAULTS {
        entry.insert(key.into(), json!(value));
    }
    Value::Object(entry)
}

fn is_default_compliance(entry: &Value) -> bool {
    entry
        .get(COMPLIANCE_REF)
        .and_then(|reference| reference.get("@refObjectId"))
        .and_then(Value::as_str)
        .is_some_and(|id| id.trim() == DEFAULT_COMPLIANCE_ID)
}

fn compliance(root: &mut Value, audit: &mut DocumentAudit<'_>) {
    let at = format!("{}/compliance", COMPLIANCE.join("/"));
    let section = match tree::ensure_object(root, &COMPLIANCE) {
        Ok(section) => section,
        Err(err) => {
            audit.record(
                at,
                Decision::SkippedUnmapped,
                format!("compliance not normalised: {err}"),
            );
            return;
        }
    };
    let current = section.get("compliance").cloned();
    let mut entries: Vec<Value> = match current.clone() {
        Some(Value::Array(items)) => {
            items.into_iter().filter(|item| !tree::is_blank(item)).collect()
        }
        Some(item) if !tree::is_blank(&item) => vec![item],
        _ => Vec::new(),
    };

    match entries.iter().position(is_default_compliance) {
        Some(index) => {
            if let Value::Object(entry) = &mut entries[index] {
                for (key, value) in COMPLIANCE_DEFAULTS {
                    if entry.get(key).is_none_or(tree::is_blank) {
                        entry.insert(key.into(), json!(value));
                    }
                }
            }
        }
        None => entries.push(default_compliance()),
    }

    let updated = if entries.len() == 1 {
        entries.remove(0)
    } else {
        Value::Array(entries)
    };
    if current.as_ref() != Some(&updated) {
        section.insert("compliance".into(), updated.clone());
        changed(audit, at, "default compliance declaration ensured", current, Some(updated));
    }
}

// ── Exchanges ──

fn exchanges(root: &mut Value, audit: &mut DocumentAudit<'_>) {
    let Some(slot) = tree::get_mut(root, &["exchanges", "exchange"]) else {
        return;
    };
    if slot.is_object() {
        let single = slot.take();
        *slot = Value::Array(vec![single]);
        audit.record("exchanges/exchange", Decision::Applied, "single exchange wrapped in a list");
    }
    let Value::Array(items) = slot else {
        return;
    };
    for (index, item) in items.iter_mut().enumerate() {
        if let Value::Object(exchange) = item {
            exchange_entry(exchange, &format!("exchanges/exchange[{index}]"), audit);
        }
    }
}

fn exchange_entry(exchange: &mut Map<String, Value>, at: &str, audit: &mut DocumentAudit<'_>) {
    if let Some(Value::String(direction)) = exchange.get_mut("exchangeDirection") {
        let fixed = capitalise(direction.trim());
        if fixed != *direction {
            let before = std::mem::replace(direction, fixed.clone());
            changed(
                audit,
                format!("{at}/exchangeDirection"),
                "direction capitalised",
                Some(json!(before)),
                Some(json!(fixed)),
            );
        }
    }

    for key in ["meanAmount", "resultingAmount"] {
        let Some(amount) = exchange.get_mut(key) else {
            continue;
        };
        let text = match &*amount {
            Value::String(text) => text.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        if amount.as_str() != Some(text.as_str()) {
            let before = std::mem::replace(amount, Value::String(text));
            changed(
                audit,
                format!("{at}/{key}"),
                "amount stored as text",
                Some(before),
                Some(amount.clone()),
            );
        }
    }

    if exchange.get("referencesToDataSource").is_some_and(tree::is_blank) {
        let before = exchange.shift_remove("referencesToDataSource");
        changed(
            audit,
            format!("{at}/referencesToDataSource"),
            "empty entry removed",
            before,
            None,
        );
    }

    let allocations = match exchange.get_mut("allocations").and_then(|a| a.get_mut("allocation")) {
        Some(Value::Object(single)) => vec![single],
        Some(Value::Array(items)) => items.iter_mut().filter_map(Value::as_object_mut).collect(),
        _ => Vec::new(),
    };
    for (index, allocation) in allocations.into_iter().enumerate() {
        let field = format!("{at}/allocations/allocation[{index}]/@allocatedFraction");
        let Some(raw) = allocation
            .get("@allocatedFraction")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            continue;
        };
        match allocation_fraction(&raw) {
            Some(fraction) if fraction == raw => {}
            Some(fraction) => {
                let before = allocation.insert("@allocatedFraction".into(), json!(fraction));
                let after = Some(json!(fraction));
                changed(audit, field, "allocation fraction normalised", before, after);
            }
            None => {
                let before = allocation.shift_remove("@allocatedFraction");
                audit.record_change(
                    field,
                    Decision::Overwritten,
                    "invalid allocation fraction removed",
                    before,
                    None,
                );
            }
        }
    }
}

fn capitalise(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// A decimal fraction in `[0, 1)`: `0.x` is kept as written, percentages and
/// other numbers are converted to at most four decimals.
pub fn allocation_fraction(raw: &str) -> Option<String> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    if text
        .strip_prefix("0.")
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
    {
        return Some(text.to_string());
    }
    let value = match text.strip_suffix('%') {
        Some(percent) => percent.trim().parse::<f64>().ok()? / 100.0,
        None => text.parse::<f64>().ok()?,
    };
    if !(0.0..1.0).contains(&value) {
        return None;
    }
    // -0 passes the range check; write it unsigned.
    let value = if value == 0.0 { 0.0 } else { value };
    let formatted = format!("{value:.4}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    Some(trimmed.to_string())
}

/// Audit a normalization change: inserting into a blank slot is `applied`,
/// replacing data is `overwritten`.
fn changed(
    audit: &mut DocumentAudit<'_>,
    field: String,
    reason: &str,
    before: Option<Value>,
    after: Option<Value>,
) {
    let decision = if before.as_ref().is_none_or(tree::is_blank) {
        Decision::Applied
    } else {
        Decision::Overwritten
    };
    audit.record_change(field, decision, reason, before, after);
}
