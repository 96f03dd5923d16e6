//! Label → canonical translation key lookup.
//!
//! The UI ships its labels as a TypeScript object literal
//! (`'pages.process.view.x.y': '中文标签',`). The table inverts it so that a
//! displayed label can be traced back to its key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;
use tracing::debug;

const ENTRY_PATTERN: &str = r#"["']([^"']+)["']\s*:\s*["']([^"']*)["']"#;

/// Resolves a human-facing label to its canonical key.
pub trait TranslationIndex {
    fn lookup(&self, label: &str) -> Option<&str>;
}

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("failed to read translation file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid entry pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("no translation entries found in '{0}'")]
    Empty(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
    keys: HashMap<String, String>,
}

impl LabelTable {
    /// Build from `(key, label)` pairs. The first key seen for a label wins.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut keys = HashMap::new();
        for (key, label) in pairs {
            let label: String = label.into();
            keys.entry(label.trim().to_string())
                .or_insert_with(|| key.into().trim().to_string());
        }
        Self { keys }
    }

    /// Parse `'key': 'label'` pairs out of a TypeScript translation module.
    pub fn parse_ts(src: &str) -> Result<Self, TranslationError> {
        let pattern = Regex::new(ENTRY_PATTERN)?;
        let table = Self::from_pairs(
            pattern
                .captures_iter(src)
                .map(|caps| (caps[1].to_string(), caps[2].to_string())),
        );
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self, TranslationError> {
        let src = std::fs::read_to_string(path).map_err(|source| TranslationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::parse_ts(&src)?;
        if table.is_empty() {
            return Err(TranslationError::Empty(path.display().to_string()));
        }
        debug!(path = %path.display(), entries = table.len(), "loaded translations");
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl TranslationIndex for LabelTable {
    fn lookup(&self, label: &str) -> Option<&str> {
        self.keys.get(label.trim()).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
export default {
  'pages.process.view.administrativeInformation.licenseType': '许可类型',
  'pages.process.view.administrativeInformation.licenseType.licenseFee': '许可费',
  "pages.process.view.administrativeInformation.licenseType.other": "其他",
  'pages.flow.view.other': '其他',
  'pages.process.view.empty': '',
};
"#;

    #[test]
    fn parses_both_quote_styles() {
        let table = LabelTable::parse_ts(SAMPLE).unwrap();
        assert_eq!(
            table.lookup("许可费"),
            Some("pages.process.view.administrativeInformation.licenseType.licenseFee")
        );
        assert_eq!(
            table.lookup(" 许可类型 "),
            Some("pages.process.view.administrativeInformation.licenseType")
        );
        assert_eq!(table.lookup("missing"), None);
    }

    #[test]
    fn first_key_for_a_label_wins() {
        let table = LabelTable::parse_ts(SAMPLE).unwrap();
        assert_eq!(
            table.lookup("其他"),
            Some("pages.process.view.administrativeInformation.licenseType.other")
        );
    }

    #[test]
    fn load_rejects_file_without_entries() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("pages_process.ts");
        std::fs::write(&path, "export default {};\n").unwrap();
        assert!(matches!(LabelTable::load(&path), Err(TranslationError::Empty(_))));
        assert!(matches!(
            LabelTable::load(&tmp.path().join("missing.ts")),
            Err(TranslationError::Io { .. })
        ));
    }
}
