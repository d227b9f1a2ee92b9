//! Filename conventions for dropped files.
//!
//! A dropped file names its target source in its own filename: the name is
//! split on `#` and the leading parts, joined with `-`, are matched against
//! the vendor's source registry. `oad#public#q3-report.pdf` lands in
//! `oad-public` when that source exists.

use std::collections::HashSet;
use std::path::Path;

pub const SOURCE_DELIMITER: char = '#';
pub const SOURCE_JOINER: &str = "-";

const UNSUPPORTED_EXTENSIONS: &[&str] = &["doc", "docx"];

/// Case-insensitive set of known vendor sources.
#[derive(Debug, Clone, Default)]
pub struct SourceIndex {
    names: HashSet<String>,
}

impl SourceIndex {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.to_lowercase())
    }

    /// The longest registered source formed by the filename's leading parts.
    ///
    /// Longer candidates are tried first and a shorter match never shadows a
    /// longer one: `oad#finance#q3.pdf` goes to `oad-finance` even when `oad`
    /// is also registered.
    pub fn resolve(&self, file_name: &str) -> Option<String> {
        let parts: Vec<&str> = file_name.split(SOURCE_DELIMITER).collect();
        (1..=parts.len())
            .rev()
            .map(|n| parts[..n].join(SOURCE_JOINER).to_lowercase())
            .find(|candidate| self.names.contains(candidate))
    }
}

pub fn source_from_filename(file_name: &str, sources: &SourceIndex) -> Option<String> {
    sources.resolve(file_name)
}

/// Word documents are not accepted by the vendor and go to manual review.
pub fn is_unsupported(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            UNSUPPORTED_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}
