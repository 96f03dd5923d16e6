//! Multilingual text entries (`{"@xml:lang": .., "#text": ..}`) and their
//! canonical ordering.

use std::cmp::Ordering;

use serde_json::{Map, Value, json};

pub const LANG_KEY: &str = "@xml:lang";
pub const TEXT_KEY: &str = "#text";

/// Language assumed for text entries that carry no language attribute.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Fixed output order. Codes not listed sort after these, alphabetically.
pub const CANONICAL_LANGUAGES: &[&str] =
    &["en", "zh", "de", "fr", "es", "it", "ja", "ko", "pt", "ru"];

fn rank(code: &str) -> usize {
    CANONICAL_LANGUAGES
        .iter()
        .position(|known| known.eq_ignore_ascii_case(code))
        .unwrap_or(CANONICAL_LANGUAGES.len())
}

/// Canonical comparison of two language codes.
pub fn compare_languages(a: &str, b: &str) -> Ordering {
    rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
}

/// Language tags compare without regard to ASCII case.
pub fn same_language(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Sort `(language, text)` pairs into canonical order, keeping the last text
/// supplied for a repeated language under its first spelling.
pub fn canonical_pairs(pairs: &[(String, String)]) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::with_capacity(pairs.len());
    for (lang, text) in pairs {
        match out.iter_mut().find(|(known, _)| same_language(known, lang)) {
            Some(slot) => slot.1 = text.clone(),
            None => out.push((lang.clone(), text.clone())),
        }
    }
    out.sort_by(|a, b| compare_languages(&a.0, &b.0));
    out
}

pub fn entry(lang: &str, text: &str) -> Value {
    json!({ LANG_KEY: lang, TEXT_KEY: text })
}

/// Language code of a text entry, if it is one.
pub fn language_of(value: &Value) -> Option<&str> {
    value.get(LANG_KEY).and_then(Value::as_str)
}

/// Extract `(language, text)` pairs from a single entry, a list of entries or
/// a bare string. Entries without a language are attributed to [`DEFAULT_LANGUAGE`].
pub fn entries(value: &Value) -> Vec<(String, String)> {
    let mut out = Vec::new();
    collect(value, &mut out);
    out
}

fn collect(value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| collect(item, out)),
        Value::Object(map) => {
            let text = map
                .get(TEXT_KEY)
                .or_else(|| map.get("text"))
                .and_then(Value::as_str);
            if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
                let lang = map
                    .get(LANG_KEY)
                    .and_then(Value::as_str)
                    .filter(|l| !l.trim().is_empty())
                    .unwrap_or(DEFAULT_LANGUAGE);
                out.push((lang.to_string(), text.to_string()));
            }
        }
        Value::String(text) if !text.trim().is_empty() => {
            out.push((DEFAULT_LANGUAGE.to_string(), text.clone()));
        }
        _ => {}
    }
}

/// Text for `lang`, falling back to the first entry of any language.
pub fn text_for(value: &Value, lang: &str) -> Option<String> {
    let all = entries(value);
    all.iter()
        .find(|(code, _)| code == lang)
        .or_else(|| all.first())
        .map(|(_, text)| text.clone())
}

/// Merge `update` into the entries already present, replacing texts for the
/// same language and preserving other languages. Always yields a list in
/// canonical order.
pub fn merge(existing: Option<&Value>, update: &[(String, String)]) -> Value {
    let mut pairs = existing.map(entries).unwrap_or_default();
    pairs.extend(update.iter().cloned());
    let merged = canonical_pairs(&pairs);
    Value::Array(
        merged
            .iter()
            .map(|(lang, text)| entry(lang, text))
            .collect(),
    )
}

/// Stable re-sort of a list of language entries into canonical order.
/// Items without a language keep their relative order at the end.
pub fn sort_entries(items: &mut [Value]) {
    items.sort_by(|a, b| match (language_of(a), language_of(b)) {
        (Some(x), Some(y)) => compare_languages(x, y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

/// An empty language entry, ready for a text to be written into it.
pub fn blank_entry(lang: &str) -> Value {
    let mut map = Map::new();
    map.insert(LANG_KEY.to_string(), Value::String(lang.to_string()));
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(l, t)| (l.to_string(), t.to_string()))
            .collect()
    }

    #[test]
    fn canonical_order_ignores_input_order() {
        let a = canonical_pairs(&pairs(&[("zh", "中"), ("en", "E")]));
        let b = canonical_pairs(&pairs(&[("en", "E"), ("zh", "中")]));
        assert_eq!(a, b);
        assert_eq!(a[0].0, "en");
        assert_eq!(a[1].0, "zh");
    }

    #[test]
    fn unknown_languages_sort_last_alphabetically() {
        let out = canonical_pairs(&pairs(&[("sv", "s"), ("nl", "n"), ("zh", "z")]));
        let codes: Vec<_> = out.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(codes, ["zh", "nl", "sv"]);
    }

    #[test]
    fn repeated_language_ignores_case() {
        let out = canonical_pairs(&pairs(&[("EN", "old"), ("zh", "z"), ("en", "new")]));
        assert_eq!(out, pairs(&[("EN", "new"), ("zh", "z")]));

        let existing = json!([{"@xml:lang": "EN", "#text": "old"}]);
        let merged = merge(Some(&existing), &pairs(&[("en", "new")]));
        assert_eq!(merged, json!([{"@xml:lang": "EN", "#text": "new"}]));
    }

    #[test]
    fn entries_from_mixed_shapes() {
        let value = json!([
            {"@xml:lang": "zh", "#text": "中文"},
            {"#text": "no lang"},
            {"@xml:lang": "de", "#text": ""}
        ]);
        assert_eq!(
            entries(&value),
            pairs(&[("zh", "中文"), ("en", "no lang")])
        );
        assert_eq!(entries(&json!("bare")), pairs(&[("en", "bare")]));
    }

    #[test]
    fn merge_upgrades_single_entry_to_list() {
        let existing = entry("zh", "旧");
        let merged = merge(Some(&existing), &pairs(&[("en", "new")]));
        assert_eq!(
            merged,
            json!([
                {"@xml:lang": "en", "#text": "new"},
                {"@xml:lang": "zh", "#text": "旧"}
            ])
        );
    }

    #[test]
    fn merge_replaces_same_language() {
        let existing = json!([{"@xml:lang": "en", "#text": "old"}]);
        let merged = merge(Some(&existing), &pairs(&[("en", "new")]));
        assert_eq!(merged, json!([{"@xml:lang": "en", "#text": "new"}]));
        // Merging the result again is a fixed point.
        assert_eq!(merge(Some(&merged), &pairs(&[("en", "new")])), merged);
    }

    #[test]
    fn text_for_falls_back_to_first() {
        let value = json!([{"@xml:lang": "zh", "#text": "钢"}]);
        assert_eq!(text_for(&value, "en").as_deref(), Some("钢"));
        assert_eq!(text_for(&json!(null), "en"), None);
    }

    #[test]
    fn sort_entries_is_stable_for_unlabelled() {
        let mut items = vec![json!({"x": 1}), entry("zh", "z"), entry("en", "e")];
        sort_entries(&mut items);
        assert_eq!(items, vec![entry("en", "e"), entry("zh", "z"), json!({"x": 1})]);
    }
}
