//! Tax document processing orchestrator.
//!
//! Single entry point that drives the full pipeline:
//! normalize → model call → reconcile → workbook + audit archive.
//!
//! The model client and the container unpacker are injected, so the whole flow runs
//! against mocks in tests.

use std::path::{Path, PathBuf};

use serde::Serialize;
use uuid::Uuid;

use crate::config::{ModelConfig, MAX_FILE_BYTES};
use crate::export::{AuditPackager, ExportError};
use crate::pipeline::container::{ContainerUnpacker, MsgUnpacker};
use crate::pipeline::diagnostic;
use crate::pipeline::import::{DocumentSection, ImportError, SourceFile};
use crate::pipeline::normalize::Normalizer;
use crate::pipeline::structuring::{
    build_extraction_prompt, reconcile, AnalysisResult, GeminiClient, LlmClient,
    StructuringError,
};
use crate::pipeline::types::{Manifest, ModelPart};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that abort a processing run. Per-file failures never reach here.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Import failed: {0}")]
    Import(#[from] ImportError),

    #[error("Structuring failed: {0}")]
    Structuring(#[from] StructuringError),

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Model input for one bundle: the ordered parts and the paths they came from.
#[derive(Debug, Clone, Default)]
pub struct PreparedBatch {
    pub parts: Vec<ModelPart>,
    pub manifest: Manifest,
}

/// Short summary for logs and CLI output.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingSummary {
    pub run_id: Uuid,
    pub files_detected: usize,
    pub parts_sent: usize,
    pub properties: usize,
    pub tax_year: Option<i32>,
    pub unused_files: Vec<String>,
    pub has_email_draft: bool,
}

pub struct ProcessingOutput {
    pub summary: ProcessingSummary,
    pub result: AnalysisResult,
    /// The audit ZIP.
    pub archive: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct TaxDocumentProcessor {
    llm: Box<dyn LlmClient>,
    unpacker: Box<dyn ContainerUnpacker>,
    max_file_bytes: usize,
    tax_year: Option<i32>,
}

impl TaxDocumentProcessor {
    pub fn new(llm: Box<dyn LlmClient>, unpacker: Box<dyn ContainerUnpacker>) -> Self {
        Self {
            llm,
            unpacker,
            max_file_bytes: MAX_FILE_BYTES,
            tax_year: None,
        }
    }

    pub fn with_max_file_bytes(mut self, max: usize) -> Self {
        self.max_file_bytes = max;
        self
    }

    /// Tell the model which year is being prepared instead of letting it guess.
    pub fn with_tax_year(mut self, year: Option<i32>) -> Self {
        self.tax_year = year;
        self
    }

    /// Normalize every file into model parts. See [`prepare_batch`].
    pub fn prepare(&self, files: &[SourceFile]) -> PreparedBatch {
        prepare_batch(self.unpacker.as_ref(), self.max_file_bytes, files)
    }

    /// Send a prepared batch to the model and reconcile its reply.
    pub fn analyze(&self, batch: &PreparedBatch) -> Result<AnalysisResult, ProcessingError> {
        self.analyze_with_dump(batch, None)
    }

    fn analyze_with_dump(
        &self,
        batch: &PreparedBatch,
        dump_dir: Option<&Path>,
    ) -> Result<AnalysisResult, ProcessingError> {
        let _span = tracing::info_span!("analyze", parts = batch.parts.len()).entered();
        let prompt = build_extraction_prompt(self.tax_year);
        if let Some(dir) = dump_dir {
            diagnostic::dump_text(dir, diagnostic::PROMPT_FILE, &prompt);
        }

        tracing::info!(parts = batch.parts.len(), "Processing: calling extraction model");
        let raw = self.llm.generate(&prompt, &batch.parts)?;
        if let Some(dir) = dump_dir {
            diagnostic::dump_text(dir, diagnostic::MODEL_RESPONSE_FILE, &raw);
        }

        let result = reconcile(&raw, &batch.manifest)?;
        if let Some(dir) = dump_dir {
            diagnostic::dump_json(dir, diagnostic::ANALYSIS_FILE, &result);
        }
        Ok(result)
    }

    /// Build the audit archive (originals, attachments, workbook, email draft).
    pub fn export(
        &self,
        result: &AnalysisResult,
        files: &[SourceFile],
    ) -> Result<Vec<u8>, ProcessingError> {
        Ok(AuditPackager::new(self.unpacker.as_ref()).package(result, files)?)
    }

    /// Full pipeline for one client bundle.
    pub fn process(&self, files: &[SourceFile]) -> Result<ProcessingOutput, ProcessingError> {
        if files.is_empty() {
            return Err(ImportError::NothingToProcess.into());
        }

        let run_id = Uuid::new_v4();
        let _span = tracing::info_span!("process", run_id = %run_id).entered();
        let dump_dir: Option<PathBuf> = diagnostic::dump_dir_for(&run_id);

        let batch = self.prepare(files);
        if batch.manifest.is_empty() {
            return Err(ImportError::NothingToProcess.into());
        }
        if let Some(dir) = dump_dir.as_deref() {
            diagnostic::dump_json(dir, diagnostic::MANIFEST_FILE, &batch.manifest);
            diagnostic::dump_json(
                dir,
                diagnostic::PARTS_SUMMARY_FILE,
                &diagnostic::summarize_parts(&batch.parts),
            );
        }

        let result = self.analyze_with_dump(&batch, dump_dir.as_deref())?;
        let archive = self.export(&result, files)?;

        let summary = ProcessingSummary {
            run_id,
            files_detected: batch.manifest.len(),
            parts_sent: batch.parts.len(),
            properties: result.properties.len(),
            tax_year: result.tax_year,
            unused_files: crate::export::compute_unused(&result.all_files_detected, &result.properties),
            has_email_draft: result.email_draft.is_some(),
        };
        tracing::info!(
            properties = summary.properties,
            files = summary.files_detected,
            unused = summary.unused_files.len(),
            archive_bytes = archive.len(),
            "Processing complete"
        );

        Ok(ProcessingOutput {
            summary,
            result,
            archive,
        })
    }
}

/// Normalize every file into model parts, section by section.
///
/// Each non-empty section opens with its marker text so the model can tell
/// current-year evidence from reference documents. Needs no model client, so a
/// dry run can show exactly what would be sent.
pub fn prepare_batch(
    unpacker: &dyn ContainerUnpacker,
    max_file_bytes: usize,
    files: &[SourceFile],
) -> PreparedBatch {
    let _span = tracing::info_span!("normalize", files = files.len()).entered();
    let normalizer = Normalizer::new(unpacker).with_max_file_bytes(max_file_bytes);
    let mut batch = PreparedBatch::default();

    let mut ordered: Vec<&SourceFile> = files.iter().collect();
    ordered.sort_by_key(|f| f.section);

    let mut current_section: Option<DocumentSection> = None;
    for file in ordered {
        if current_section != Some(file.section) {
            batch.parts.push(ModelPart::text(file.section.marker()));
            current_section = Some(file.section);
        }
        let parts = normalizer.normalize(file.to_raw(), &mut batch.manifest, "");
        batch.parts.extend(parts);
    }

    tracing::info!(
        files = files.len(),
        manifest_entries = batch.manifest.len(),
        parts = batch.parts.len(),
        "Documents normalized"
    );
    batch
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build a processor with the production Gemini client and `.msg` unpacker.
pub fn build_processor(config: &ModelConfig) -> Result<TaxDocumentProcessor, ProcessingError> {
    let llm = GeminiClient::new(config)?;
    tracing::info!(model = %llm.model(), "Document processor using model");
    Ok(TaxDocumentProcessor::new(Box::new(llm), Box::new(MsgUnpacker)))
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};
    use std::sync::Arc;

    use super::*;
    use crate::config::WORKBOOK_FILE_NAME;
    use crate::pipeline::container::msg::fixtures::{build_msg, MsgFixture};
    use crate::pipeline::structuring::MockLlmClient;

    const MODEL_REPLY: &str = r#"Here you go:
    {
      "tax_year": 2024,
      "properties": [{
        "address": "12 Elm St",
        "income": {"Rent": {"amount": 18000, "source_file": "ledger.csv"}},
        "expenses": {"Repairs": {"amount": 320, "source_file": "Email.msg > invoice.pdf"}},
        "source_files_read": ["ledger.csv", "Email.msg > invoice.pdf"]
      }],
      "all_files_detected": ["ledger.csv"],
      "email_draft": "Please send your property tax bill."
    }"#;

    fn processor(reply: &str) -> TaxDocumentProcessor {
        TaxDocumentProcessor::new(Box::new(MockLlmClient::new(reply)), Box::new(MsgUnpacker))
    }

    fn bundle() -> Vec<SourceFile> {
        vec![
            SourceFile::new("2023.txt", b"Rent 17000".to_vec()).in_section(DocumentSection::PriorYear),
            SourceFile::new("ledger.csv", b"month,rent\nJan,1500\n".to_vec()),
            SourceFile::new(
                "Email.msg",
                build_msg(&MsgFixture::new("Invoice").attach("invoice.pdf", b"%PDF-1.4".to_vec())),
            ),
        ]
    }

    #[test]
    fn prepare_groups_sections_with_markers() {
        let batch = processor("{}").prepare(&bundle());
        let texts: Vec<&str> = batch.parts.iter().filter_map(|p| p.as_text()).collect();

        assert_eq!(texts[0], DocumentSection::Current.marker());
        assert!(texts[1].starts_with("FILE CONTENT (ledger.csv):"));
        let prior_at = texts
            .iter()
            .position(|t| *t == DocumentSection::PriorYear.marker())
            .unwrap();
        assert_eq!(texts[prior_at + 1], "FILE CONTENT (PRIOR/2023.txt):\nRent 17000");
        assert_eq!(
            batch.manifest.entries(),
            ["ledger.csv", "Email.msg", "Email.msg > invoice.pdf", "PRIOR/2023.txt"]
        );
    }

    #[test]
    fn prepare_without_reference_documents_has_one_marker() {
        let files = vec![SourceFile::new("a.txt", b"x".to_vec())];
        let batch = processor("{}").prepare(&files);
        let markers = batch
            .parts
            .iter()
            .filter_map(|p| p.as_text())
            .filter(|t| t.starts_with("==="))
            .count();
        assert_eq!(markers, 1);
    }

    #[test]
    fn analyze_overwrites_manifest() {
        let proc = processor(MODEL_REPLY);
        let batch = proc.prepare(&bundle());
        let result = proc.analyze(&batch).unwrap();

        assert_eq!(result.all_files_detected, batch.manifest);
        assert_eq!(result.tax_year, Some(2024));
        assert_eq!(result.properties[0].income["Rent"].amount, 18000.0);
    }

    #[test]
    fn model_receives_prepared_parts_in_order() {
        let mock = Arc::new(MockLlmClient::new("{}"));
        let proc = TaxDocumentProcessor::new(Box::new(Arc::clone(&mock)), Box::new(MsgUnpacker));
        let batch = proc.prepare(&bundle());
        proc.analyze(&batch).unwrap();

        assert_eq!(mock.received_parts(), batch.parts);
    }

    #[test]
    fn blank_model_reply_is_fatal() {
        let proc = processor("   ");
        let err = proc.analyze(&proc.prepare(&bundle())).unwrap_err();
        assert!(matches!(
            err,
            ProcessingError::Structuring(StructuringError::EmptyResponse)
        ));
    }

    #[test]
    fn unparseable_model_reply_is_fatal() {
        let proc = processor("Sorry, I can't help with that.");
        let err = proc.analyze(&proc.prepare(&bundle())).unwrap_err();
        assert!(matches!(
            err,
            ProcessingError::Structuring(StructuringError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn process_produces_archive_and_summary() {
        let output = processor(MODEL_REPLY).process(&bundle()).unwrap();

        assert_eq!(output.summary.files_detected, 4);
        assert_eq!(output.summary.properties, 1);
        assert_eq!(output.summary.unused_files, vec!["Email.msg".to_string()]);
        assert!(output.summary.has_email_draft);

        let mut archive = zip::ZipArchive::new(Cursor::new(output.archive)).unwrap();
        let mut workbook = Vec::new();
        archive
            .by_name(WORKBOOK_FILE_NAME)
            .unwrap()
            .read_to_end(&mut workbook)
            .unwrap();
        assert!(!workbook.is_empty());
        assert!(archive
            .by_name("Source_Documents/Email.msg_attachments/invoice.pdf")
            .is_ok());
        assert!(archive.by_name("Source_Documents/PRIOR/2023.txt").is_ok());
    }

    #[test]
    fn process_rejects_empty_input() {
        let err = processor(MODEL_REPLY).process(&[]).err().unwrap();
        assert!(matches!(
            err,
            ProcessingError::Import(ImportError::NothingToProcess)
        ));
    }

    #[test]
    fn process_rejects_bundle_with_only_ignored_files() {
        let files = vec![SourceFile::new(".DS_Store", vec![0])];
        let err = processor(MODEL_REPLY).process(&files).err().unwrap();
        assert!(matches!(
            err,
            ProcessingError::Import(ImportError::NothingToProcess)
        ));
    }
}
