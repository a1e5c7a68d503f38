//! Recursive normalizer: raw files in, model parts and manifest entries out.
//!
//! Containers are walked depth-first with an explicit work stack rather than call
//! recursion, so adversarially nested mail cannot exhaust the thread stack. The
//! emission order is the same as the recursive formulation: a container's header,
//! then for each attachment its label followed by everything that attachment
//! produced, before the next sibling starts.

use crate::config::MAX_FILE_BYTES;
use crate::pipeline::container::ContainerUnpacker;
use crate::pipeline::extraction::{
    decode_plain_text, extract_document_text, extract_tabular_text, file_content_block,
};
use crate::pipeline::import::format::{
    classify_with_mime, extension_for_mime, extension_of, Strategy, TextExtractor,
};
use crate::pipeline::types::{join_path, Manifest, ModelPart, RawFile};

/// Pending unit of work on the traversal stack.
enum Work {
    File { file: RawFile, parent: String },
    Emit(ModelPart),
}

/// Turns raw files into model parts, recording every path it reads.
pub struct Normalizer<'a> {
    unpacker: &'a dyn ContainerUnpacker,
    max_file_bytes: usize,
}

impl<'a> Normalizer<'a> {
    pub fn new(unpacker: &'a dyn ContainerUnpacker) -> Self {
        Self {
            unpacker,
            max_file_bytes: MAX_FILE_BYTES,
        }
    }

    pub fn with_max_file_bytes(mut self, max: usize) -> Self {
        self.max_file_bytes = max;
        self
    }

    /// Normalize one file (and, for containers, everything inside it).
    ///
    /// Appends one manifest entry per file actually processed. Skipped and oversize
    /// files leave no trace. Per-file failures are logged and contribute no parts.
    pub fn normalize(&self, file: RawFile, manifest: &mut Manifest, parent_path: &str) -> Vec<ModelPart> {
        let mut parts = Vec::new();
        let mut stack = vec![Work::File {
            file,
            parent: parent_path.to_string(),
        }];

        while let Some(work) = stack.pop() {
            match work {
                Work::Emit(part) => parts.push(part),
                Work::File { file, parent } => {
                    self.process_one(file, &parent, manifest, &mut parts, &mut stack);
                }
            }
        }

        parts
    }

    fn process_one(
        &self,
        file: RawFile,
        parent: &str,
        manifest: &mut Manifest,
        parts: &mut Vec<ModelPart>,
        stack: &mut Vec<Work>,
    ) {
        let current = join_path(parent, &file.name);

        let strategy = classify_with_mime(&file.name, file.mime_type.as_deref());
        if strategy.is_skip() {
            tracing::debug!(path = %current, "Skipping unsupported or ignored file");
            return;
        }

        if file.len() > self.max_file_bytes {
            tracing::warn!(
                path = %current,
                size_bytes = file.len(),
                limit_bytes = self.max_file_bytes,
                "Skipping oversize file"
            );
            return;
        }

        // Recorded before dispatch: the manifest means "attempted", not "succeeded".
        manifest.push(current.clone());

        match strategy {
            Strategy::Skip => {}
            Strategy::BinaryPassthrough { mime_type } => {
                parts.push(ModelPart::Binary {
                    mime_type: mime_type.to_string(),
                    bytes: file.bytes,
                });
                parts.push(ModelPart::text(format!("[BINARY FILE: {current}]")));
            }
            Strategy::TabularExtract => match extract_tabular_text(&format_name(&file), &file.bytes) {
                Ok(text) => parts.push(ModelPart::text(file_content_block(&current, &text))),
                Err(e) => tracing::warn!(path = %current, error = %e, "Spreadsheet extraction failed"),
            },
            Strategy::TextExtract {
                extractor: TextExtractor::Document,
            } => match extract_document_text(&file.bytes) {
                Ok(text) => parts.push(ModelPart::text(file_content_block(&current, &text))),
                Err(e) => tracing::warn!(path = %current, error = %e, "Document extraction failed"),
            },
            Strategy::TextExtract {
                extractor: TextExtractor::Plain,
            } => {
                let text = decode_plain_text(&file.bytes);
                parts.push(ModelPart::text(file_content_block(&current, &text)));
            }
            Strategy::ContainerUnpack => match self.unpacker.unpack(&file.bytes) {
                Ok(message) => {
                    parts.push(ModelPart::text(file_content_block(
                        &current,
                        &message.header_text(),
                    )));
                    tracing::debug!(
                        path = %current,
                        attachments = message.attachments.len(),
                        "Unpacked mail container"
                    );
                    // Reverse push so the first attachment is processed first.
                    for attachment in message.attachments.into_iter().rev() {
                        let label = format!("[ATTACHMENT: {} found in {current}]", attachment.name);
                        stack.push(Work::File {
                            file: attachment,
                            parent: current.clone(),
                        });
                        stack.push(Work::Emit(ModelPart::text(label)));
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %current, error = %e, "Mail container could not be parsed");
                }
            },
        }
    }
}

/// Name used to pick a spreadsheet reader; borrows an extension from the declared MIME type.
fn format_name(file: &RawFile) -> String {
    match (extension_of(&file.name), file.mime_type.as_deref().and_then(extension_for_mime)) {
        (None, Some(ext)) => format!("{}.{ext}", file.name),
        _ => file.name.clone(),
    }
}
