use super::types::AnalysisResult;
use super::StructuringError;
use crate::pipeline::types::Manifest;

/// Longest slice of raw model text carried in a `MalformedResponse`.
const EXCERPT_CHARS: usize = 500;

/// Turn raw model text into an `AnalysisResult`.
///
/// Conversational chatter around the JSON object is dropped. The model's own file list is
/// replaced with `manifest`, the list of what the normalizer actually read.
pub fn reconcile(raw: &str, manifest: &Manifest) -> Result<AnalysisResult, StructuringError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(StructuringError::EmptyResponse);
    }

    let malformed = |reason: String| StructuringError::MalformedResponse {
        reason,
        excerpt: excerpt(trimmed),
    };

    let json = isolate_json_object(trimmed);
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| malformed(e.to_string()))?;
    // Derived struct visitors also accept sequences; only an object is a reply.
    if !value.is_object() {
        return Err(malformed("top-level JSON value is not an object".to_string()));
    }
    let mut result: AnalysisResult =
        serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?;

    if result.all_files_detected != *manifest {
        tracing::debug!(
            manifest_entries = manifest.len(),
            "Overwriting model-reported file list with pipeline manifest"
        );
    }
    result.all_files_detected = manifest.clone();

    tracing::info!(
        properties = result.properties.len(),
        tax_year = ?result.tax_year,
        "Model response reconciled"
    );
    Ok(result)
}

/// Slice from the first `{` to the last `}`; the whole text when no such pair exists.
fn isolate_json_object(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

fn excerpt(text: &str) -> String {
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
