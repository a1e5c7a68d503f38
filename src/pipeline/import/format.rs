use std::path::Path;

use serde::Serialize;

use crate::config::PATH_SEPARATOR;

/// Extensions accepted anywhere in the pipeline (upload filtering, sniffing, packaging).
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "pdf", "jpg", "jpeg", "png", "xlsx", "xls", "csv", "docx", "doc", "msg", "txt",
];

/// Exact file names that are OS or editor noise.
const IGNORED_NAMES: &[&str] = &["thumbs.db", "desktop.ini", "icon\r"];

/// Stands in for a breadcrumb separator found inside a file name.
const SEPARATOR_REPLACEMENT: &str = " - ";

/// Folder names whose contents are never client documents.
const IGNORED_DIRS: &[&str] = &["__macosx"];

/// How a text-bearing file is turned into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextExtractor {
    /// Word processing document (docx body text).
    Document,
    /// Bytes decoded as UTF-8, lossily.
    Plain,
}

/// Handling strategy chosen for a file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Strategy {
    Skip,
    BinaryPassthrough { mime_type: &'static str },
    TextExtract { extractor: TextExtractor },
    TabularExtract,
    ContainerUnpack,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::BinaryPassthrough { .. } => "binary_passthrough",
            Self::TextExtract { .. } => "text_extract",
            Self::TabularExtract => "tabular_extract",
            Self::ContainerUnpack => "container_unpack",
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip)
    }
}

/// Pick a strategy from a file name (or relative path). Extension match is case-insensitive.
pub fn classify(filename: &str) -> Strategy {
    classify_with_mime(filename, None)
}

/// Like [`classify`], but falls back to a declared MIME type when the name has no extension.
pub fn classify_with_mime(filename: &str, declared_mime: Option<&str>) -> Strategy {
    if is_ignored(filename) {
        return Strategy::Skip;
    }

    let ext = match extension_of(filename).or_else(|| declared_mime.and_then(extension_for_mime)) {
        Some(ext) => ext,
        None => return Strategy::Skip,
    };

    if !is_supported_extension(&ext) {
        return Strategy::Skip;
    }

    match ext.as_str() {
        "pdf" => Strategy::BinaryPassthrough {
            mime_type: "application/pdf",
        },
        "jpg" | "jpeg" => Strategy::BinaryPassthrough {
            mime_type: "image/jpeg",
        },
        "png" => Strategy::BinaryPassthrough {
            mime_type: "image/png",
        },
        "xlsx" | "xls" | "csv" => Strategy::TabularExtract,
        "docx" | "doc" => Strategy::TextExtract {
            extractor: TextExtractor::Document,
        },
        "msg" => Strategy::ContainerUnpack,
        _ => Strategy::TextExtract {
            extractor: TextExtractor::Plain,
        },
    }
}

pub fn is_supported_extension(ext: &str) -> bool {
    let ext = ext.to_ascii_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

/// Lower-cased extension of the last path component, if any.
pub fn extension_of(filename: &str) -> Option<String> {
    let base = base_name(filename);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Hidden files, Office lock files, OS metadata and anything under an ignored folder.
pub fn is_ignored(filename: &str) -> bool {
    let base = base_name(filename);
    if base.is_empty() || base.starts_with('.') || base.starts_with("~$") {
        return true;
    }
    if IGNORED_NAMES.contains(&base.to_ascii_lowercase().as_str()) {
        return true;
    }
    filename
        .split(['/', '\\'])
        .any(|component| IGNORED_DIRS.contains(&component.to_ascii_lowercase().as_str()))
}

pub fn extension_for_mime(mime: &str) -> Option<String> {
    let ext = match mime.trim().to_ascii_lowercase().as_str() {
        "application/pdf" => "pdf",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "text/csv" => "csv",
        "text/plain" => "txt",
        "application/vnd.ms-outlook" => "msg",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        _ => return None,
    };
    Some(ext.to_string())
}

fn base_name(filename: &str) -> &str {
    filename.rsplit(['/', '\\']).next().unwrap_or(filename)
}

/// Replace the breadcrumb separator inside a single name so `" > "` only ever joins levels.
pub fn escape_path_separator(name: &str) -> String {
    let mut out = name.to_string();
    // One pass can leave a fresh separator behind (`"a > > b"`), so repeat until clean.
    while out.contains(PATH_SEPARATOR) {
        out = out.replace(PATH_SEPARATOR, SEPARATOR_REPLACEMENT);
    }
    out
}

/// Strip path components and characters that would break archive paths.
pub fn sanitize_filename(original: &str) -> String {
    let name = Path::new(original)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    let clean: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .filter(|c| *c != '\0')
        .take(255)
        .collect();

    let clean = escape_path_separator(clean.trim());
    if clean.is_empty() || clean == "." || clean == ".." {
        "attachment".to_string()
    } else {
        clean
    }
}
