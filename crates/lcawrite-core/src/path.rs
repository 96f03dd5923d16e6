//! Schema paths: where in a process document a requirement value belongs.
//!
//! A path is a list of object keys. The literal segment `{lang}` marks a
//! "repeat for each language" position: the node before it is a list with one
//! entry per language code, and the remaining keys are walked inside each entry.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Literal segment that marks a per-language repetition in configured paths.
pub const LANGUAGE_MARKER: &str = "{lang}";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    EachLanguage,
}

impl PathSegment {
    pub fn parse(raw: &str) -> Self {
        if raw.trim() == LANGUAGE_MARKER {
            Self::EachLanguage
        } else {
            Self::Key(raw.to_string())
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::EachLanguage => f.write_str(LANGUAGE_MARKER),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("path contains more than one language marker")]
    MultipleMarkers,

    #[error("language marker cannot be the first segment")]
    MarkerAtRoot,

    #[error("'{key}' is blocked by an existing {found} value")]
    Blocked { key: String, found: &'static str },
}

/// Ordered path segments from a document root (or an exchange entry) to a field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct SchemaPath(Vec<PathSegment>);

/// A path split around its optional language marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathLayout<'p> {
    /// Keys from the root to the destination slot.
    Direct(Vec<&'p str>),
    /// Keys to the per-language list, then keys inside each language entry.
    PerLanguage {
        prefix: Vec<&'p str>,
        suffix: Vec<&'p str>,
    },
}

impl SchemaPath {
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }

    /// Build a path from raw segment strings, recognising the language marker.
    pub fn parse<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            segments
                .into_iter()
                .map(|s| PathSegment::parse(s.as_ref()))
                .collect(),
        )
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_language_marker(&self) -> bool {
        self.0.contains(&PathSegment::EachLanguage)
    }

    /// The last object key on the path.
    pub fn leaf_key(&self) -> Option<&str> {
        self.0.iter().rev().find_map(|segment| match segment {
            PathSegment::Key(key) => Some(key.as_str()),
            PathSegment::EachLanguage => None,
        })
    }

    pub fn layout(&self) -> Result<PathLayout<'_>, PathError> {
        if self.0.is_empty() {
            return Err(PathError::Empty);
        }
        let mut prefix = Vec::new();
        let mut suffix = Vec::new();
        let mut marker_seen = false;
        for segment in &self.0 {
            match segment {
                PathSegment::EachLanguage if marker_seen => return Err(PathError::MultipleMarkers),
                PathSegment::EachLanguage => marker_seen = true,
                PathSegment::Key(key) if marker_seen => suffix.push(key.as_str()),
                PathSegment::Key(key) => prefix.push(key.as_str()),
            }
        }
        if !marker_seen {
            return Ok(PathLayout::Direct(prefix));
        }
        if prefix.is_empty() {
            return Err(PathError::MarkerAtRoot);
        }
        Ok(PathLayout::PerLanguage { prefix, suffix })
    }
}

impl From<Vec<String>> for SchemaPath {
    fn from(raw: Vec<String>) -> Self {
        Self::parse(raw)
    }
}

impl From<SchemaPath> for Vec<String> {
    fn from(path: SchemaPath) -> Self {
        path.0.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for SchemaPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_recognises_marker() {
        let path = SchemaPath::parse(["a", "{lang}", "b"]);
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Key("a".into()),
                PathSegment::EachLanguage,
                PathSegment::Key("b".into()),
            ]
        );
        assert!(path.has_language_marker());
        assert_eq!(path.to_string(), "a/{lang}/b");
    }

    #[test]
    fn direct_layout() {
        let path = SchemaPath::parse(["a", "b"]);
        assert_eq!(path.layout().unwrap(), PathLayout::Direct(vec!["a", "b"]));
        assert_eq!(path.leaf_key(), Some("b"));
    }

    #[test]
    fn per_language_layout() {
        let path = SchemaPath::parse(["name", "baseName", "{lang}"]);
        assert_eq!(
            path.layout().unwrap(),
            PathLayout::PerLanguage {
                prefix: vec!["name", "baseName"],
                suffix: vec![],
            }
        );
    }

    #[test]
    fn invalid_layouts() {
        assert_eq!(SchemaPath::default().layout(), Err(PathError::Empty));
        assert_eq!(
            SchemaPath::parse(["{lang}", "a"]).layout(),
            Err(PathError::MarkerAtRoot)
        );
        assert_eq!(
            SchemaPath::parse(["a", "{lang}", "b", "{lang}"]).layout(),
            Err(PathError::MultipleMarkers)
        );
    }

    #[test]
    fn deserializes_from_string_list() {
        let path: SchemaPath = serde_json::from_str(r#"["x", "{lang}"]"#).unwrap();
        assert_eq!(path, SchemaPath::parse(["x", "{lang}"]));
        let back = serde_json::to_string(&path).unwrap();
        assert_eq!(back, r#"["x","{lang}"]"#);
    }
}
