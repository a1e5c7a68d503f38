pub mod format;
pub mod importer;

pub use format::*;
pub use importer::*;

use serde::Serialize;
use thiserror::Error;

use crate::config::{PRIOR_YEAR_PREFIX, TEMPLATE_PREFIX};
use crate::pipeline::import::format::escape_path_separator;
use crate::pipeline::types::RawFile;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Input not found: {0}")]
    NotFound(String),

    #[error("No supported documents found in the given inputs")]
    NothingToProcess,
}

/// Which part of the client's bundle a document belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSection {
    /// Current-year evidence: statements, invoices, receipts.
    Current,
    /// Last year's return, reference only.
    PriorYear,
    /// Preparer's template, reference only.
    Template,
}

impl DocumentSection {
    /// Relative-path prefix given to reference-only documents.
    pub fn path_prefix(&self) -> Option<&'static str> {
        match self {
            Self::Current => None,
            Self::PriorYear => Some(PRIOR_YEAR_PREFIX),
            Self::Template => Some(TEMPLATE_PREFIX),
        }
    }

    /// Text part announcing the start of this section to the model.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Current => "=== CURRENT YEAR SOURCE DOCUMENTS ===",
            Self::PriorYear => "=== PRIOR YEAR RETURN (REFERENCE ONLY) ===",
            Self::Template => "=== TEMPLATE (REFERENCE ONLY) ===",
        }
    }
}

/// An original input file plus where it sat in the client's folder.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    /// Folder-relative path as uploaded, e.g. `Unit 2/invoices/plumber.pdf`.
    pub relative_path: Option<String>,
    pub bytes: Vec<u8>,
    pub section: DocumentSection,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: escape_path_separator(&name.into()),
            relative_path: None,
            bytes,
            section: DocumentSection::Current,
        }
    }

    pub fn with_relative_path(mut self, path: impl Into<String>) -> Self {
        let path = escape_path_separator(&path.into().replace('\\', "/"));
        self.relative_path = Some(path.trim_start_matches('/').to_string());
        self
    }

    /// Move the file into a section, prefixing its path (`PRIOR/…`, `TEMPLATE/…`).
    pub fn in_section(mut self, section: DocumentSection) -> Self {
        self.section = section;
        if let Some(prefix) = section.path_prefix() {
            let inner = self.path().to_string();
            if !inner.starts_with(&format!("{prefix}/")) {
                self.relative_path = Some(format!("{prefix}/{inner}"));
            }
        }
        self
    }

    /// Relative path if known, otherwise the bare name.
    ///
    /// Manifest entries, archive paths and workbook hyperlinks all start from this string.
    pub fn path(&self) -> &str {
        self.relative_path.as_deref().unwrap_or(&self.name)
    }

    pub fn to_raw(&self) -> RawFile {
        RawFile::new(self.path(), self.bytes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_prefers_relative_path() {
        let file = SourceFile::new("a.pdf", vec![]).with_relative_path("Unit 1/a.pdf");
        assert_eq!(file.path(), "Unit 1/a.pdf");
        assert_eq!(SourceFile::new("b.pdf", vec![]).path(), "b.pdf");
    }

    #[test]
    fn backslashes_and_leading_slash_normalized() {
        let file = SourceFile::new("a.pdf", vec![]).with_relative_path("\\Unit 1\\a.pdf");
        assert_eq!(file.path(), "Unit 1/a.pdf");
    }

    #[test]
    fn breadcrumb_separator_escaped_in_names_and_paths() {
        assert_eq!(SourceFile::new("Rent > March.pdf", vec![]).path(), "Rent - March.pdf");
        let file = SourceFile::new("a.pdf", vec![]).with_relative_path("Q1 > Q2/a.pdf");
        assert_eq!(file.path(), "Q1 - Q2/a.pdf");
    }

    #[test]
    fn prior_year_files_get_prefix() {
        let file = SourceFile::new("2023.pdf", vec![]).in_section(DocumentSection::PriorYear);
        assert_eq!(file.path(), "PRIOR/2023.pdf");
        assert_eq!(file.section, DocumentSection::PriorYear);
    }

    #[test]
    fn section_prefix_not_doubled() {
        let file = SourceFile::new("t.xlsx", vec![])
            .with_relative_path("TEMPLATE/t.xlsx")
            .in_section(DocumentSection::Template);
        assert_eq!(file.path(), "TEMPLATE/t.xlsx");
    }

    #[test]
    fn current_section_keeps_path() {
        let file = SourceFile::new("a.pdf", vec![]).in_section(DocumentSection::Current);
        assert_eq!(file.path(), "a.pdf");
    }

    #[test]
    fn sections_order_current_first() {
        let mut sections = vec![
            DocumentSection::Template,
            DocumentSection::Current,
            DocumentSection::PriorYear,
        ];
        sections.sort();
        assert_eq!(
            sections,
            vec![
                DocumentSection::Current,
                DocumentSection::PriorYear,
                DocumentSection::Template
            ]
        );
    }
}
