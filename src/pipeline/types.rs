use serde::{Deserialize, Serialize};

use crate::config::PATH_SEPARATOR;

/// A file as it enters the normalizer: an upload, or an attachment pulled out of a container.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFile {
    pub name: String,
    pub bytes: Vec<u8>,
    /// MIME type the container declared for this file, if any.
    pub mime_type: Option<String>,
}

impl RawFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: Option<String>) -> Self {
        self.mime_type = mime_type.filter(|m| !m.trim().is_empty());
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// One unit of content sent to the extraction model.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelPart {
    Binary { mime_type: String, bytes: Vec<u8> },
    Text { content: String },
}

impl ModelPart {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn mime_type(&self) -> &str {
        match self {
            Self::Binary { mime_type, .. } => mime_type,
            Self::Text { .. } => "text/plain",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { content } => Some(content),
            Self::Binary { .. } => None,
        }
    }
}

/// Ordered list of every path the normalizer actually read.
///
/// Append-only. Duplicate names under the same parent are kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Vec<String>);

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: impl Into<String>) {
        self.0.push(path.into());
    }

    pub fn entries(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl From<Vec<String>> for Manifest {
    fn from(entries: Vec<String>) -> Self {
        Self(entries)
    }
}

/// `parent > child`, or just `child` at the top level.
pub fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}{PATH_SEPARATOR}{child}")
    }
}
