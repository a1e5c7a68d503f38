//! Pipeline diagnostic dump: writes intermediate artifacts of one run to disk.
//!
//! Disabled unless `TAXDOC_DUMP_DIR` is set. Output structure:
//! ```text
//! {dump_dir}/{run_id}/
//!   00-manifest.json
//!   01-parts-summary.json
//!   02-prompt.txt
//!   03-model-response.txt
//!   04-analysis.json
//! ```

use std::path::{Path, PathBuf};

use serde::Serialize;
use uuid::Uuid;

use crate::pipeline::types::ModelPart;

pub const DUMP_DIR_ENV: &str = "TAXDOC_DUMP_DIR";

pub const MANIFEST_FILE: &str = "00-manifest.json";
pub const PARTS_SUMMARY_FILE: &str = "01-parts-summary.json";
pub const PROMPT_FILE: &str = "02-prompt.txt";
pub const MODEL_RESPONSE_FILE: &str = "03-model-response.txt";
pub const ANALYSIS_FILE: &str = "04-analysis.json";

/// Characters of each text part kept in the parts summary.
const PREVIEW_CHARS: usize = 120;

// ──────────────────────────────────────────────
// Dump directory resolution
// ──────────────────────────────────────────────

/// Returns the dump directory for a run, or `None` if diagnostics are disabled.
pub fn dump_dir_for(run_id: &Uuid) -> Option<PathBuf> {
    let base = std::env::var_os(DUMP_DIR_ENV)?;
    dump_dir_in(Path::new(&base), run_id)
}

/// Create `{base}/{run_id}`. Returns `None` (with a warning) if creation fails; never panics.
pub fn dump_dir_in(base: &Path, run_id: &Uuid) -> Option<PathBuf> {
    let dir = base.join(run_id.to_string());

    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(
            path = %dir.display(),
            error = %e,
            "Diagnostic dump: failed to create directory"
        );
        return None;
    }

    Some(dir)
}

// ──────────────────────────────────────────────
// Dump writers
// ──────────────────────────────────────────────

/// Write a JSON artifact, pretty-printed. Never panics.
pub fn dump_json<T: Serialize>(dir: &Path, filename: &str, value: &T) {
    let path = dir.join(filename);
    match serde_json::to_string_pretty(value) {
        Ok(json) => match std::fs::write(&path, json.as_bytes()) {
            Ok(()) => tracing::debug!(
                path = %path.display(),
                size = json.len(),
                "Diagnostic dump: JSON written"
            ),
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "Diagnostic dump: failed to write JSON"
            ),
        },
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "Diagnostic dump: failed to serialize JSON"
        ),
    }
}

/// Write a text artifact (prompt, raw model reply). Never panics.
pub fn dump_text(dir: &Path, filename: &str, text: &str) {
    let path = dir.join(filename);
    match std::fs::write(&path, text.as_bytes()) {
        Ok(()) => tracing::debug!(
            path = %path.display(),
            size = text.len(),
            "Diagnostic dump: text written"
        ),
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "Diagnostic dump: failed to write text"
        ),
    }
}

// ──────────────────────────────────────────────
// Part summaries
// ──────────────────────────────────────────────

/// One row of `01-parts-summary.json`. Binary payloads are never dumped, only their size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartSummary {
    pub index: usize,
    pub mime_type: String,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

pub fn summarize_parts(parts: &[ModelPart]) -> Vec<PartSummary> {
    parts
        .iter()
        .enumerate()
        .map(|(index, part)| match part {
            ModelPart::Binary { mime_type, bytes } => PartSummary {
                index,
                mime_type: mime_type.clone(),
                size: bytes.len(),
                preview: None,
            },
            ModelPart::Text { content } => PartSummary {
                index,
                mime_type: part.mime_type().to_string(),
                size: content.len(),
                preview: Some(content.chars().take(PREVIEW_CHARS).collect()),
            },
        })
        .collect()
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
