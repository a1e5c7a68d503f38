//! Audit archive: the original documents, every attachment pulled out of them,
//! the summary workbook and the client email draft, in one ZIP.
//!
//! ```text
//! Source_Documents/
//!   <relative path>
//!   <relative path>_attachments/<attachment name>
//! Tax_Summary.xlsx
//! Client_Email_Draft.txt
//! ```

use std::collections::HashSet;
use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::workbook::build_workbook;
use super::xlsx::render_xlsx;
use super::{clean_archive_path, ExportError};
use crate::config::{
    ATTACHMENTS_SUFFIX, EMAIL_DRAFT_FILE_NAME, SOURCE_DOCUMENTS_DIR, WORKBOOK_FILE_NAME,
};
use crate::pipeline::container::ContainerUnpacker;
use crate::pipeline::import::{classify_with_mime, SourceFile, Strategy};
use crate::pipeline::structuring::AnalysisResult;

/// Builds the audit ZIP. Does its own unpack pass over containers, separate from the normalizer.
pub struct AuditPackager<'a> {
    unpacker: &'a dyn ContainerUnpacker,
}

struct ArchiveWriter {
    zip: ZipWriter<Cursor<Vec<u8>>>,
    options: SimpleFileOptions,
    written: HashSet<String>,
}

impl ArchiveWriter {
    fn new() -> Self {
        Self {
            zip: ZipWriter::new(Cursor::new(Vec::new())),
            options: SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
            written: HashSet::new(),
        }
    }

    fn add_directory(&mut self, dir: &str) -> Result<(), ExportError> {
        self.zip
            .add_directory(format!("{dir}/"), self.options)
            .map_err(|e| ExportError::FolderCreation {
                folder: dir.to_string(),
                reason: e.to_string(),
            })
    }

    /// Write one entry. Returns `false` (and writes nothing) if the name is already taken.
    fn add_file(&mut self, name: &str, bytes: &[u8]) -> Result<bool, ExportError> {
        if !self.written.insert(name.to_string()) {
            tracing::warn!(entry = %name, "Duplicate archive entry, keeping the first");
            return Ok(false);
        }
        self.zip.start_file(name, self.options)?;
        self.zip.write_all(bytes)?;
        Ok(true)
    }

    fn finish(self) -> Result<Vec<u8>, ExportError> {
        Ok(self.zip.finish()?.into_inner())
    }
}

fn source_entry(path: &str) -> String {
    format!("{SOURCE_DOCUMENTS_DIR}/{}", clean_archive_path(path))
}

fn is_container(name: &str, declared_mime: Option<&str>) -> bool {
    matches!(classify_with_mime(name, declared_mime), Strategy::ContainerUnpack)
}

impl<'a> AuditPackager<'a> {
    pub fn new(unpacker: &'a dyn ContainerUnpacker) -> Self {
        Self { unpacker }
    }

    pub fn package(
        &self,
        result: &AnalysisResult,
        originals: &[SourceFile],
    ) -> Result<Vec<u8>, ExportError> {
        let _span = tracing::info_span!("package", files = originals.len()).entered();
        let mut archive = ArchiveWriter::new();

        archive.add_directory(SOURCE_DOCUMENTS_DIR)?;

        let mut attachments = 0usize;
        for file in originals {
            archive.add_file(&source_entry(file.path()), &file.bytes)?;
            if is_container(file.path(), None) {
                attachments += self.write_attachments(&mut archive, file.path(), &file.bytes)?;
            }
        }

        let workbook = render_xlsx(&build_workbook(result))?;
        archive.add_file(WORKBOOK_FILE_NAME, &workbook)?;

        if let Some(draft) = result.email_draft.as_deref() {
            archive.add_file(EMAIL_DRAFT_FILE_NAME, draft.as_bytes())?;
        }

        let bytes = archive.finish()?;
        tracing::info!(
            originals = originals.len(),
            attachments,
            size = bytes.len(),
            "Audit archive built"
        );
        Ok(bytes)
    }

    /// Write every attachment of a container, recursing into nested containers.
    ///
    /// A container that fails to open is logged and skipped; its siblings are unaffected.
    fn write_attachments(
        &self,
        archive: &mut ArchiveWriter,
        container_path: &str,
        bytes: &[u8],
    ) -> Result<usize, ExportError> {
        let mut written = 0;
        let mut pending: Vec<(String, Vec<u8>)> = vec![(container_path.to_string(), bytes.to_vec())];

        while let Some((path, bytes)) = pending.pop() {
            let message = match self.unpacker.unpack(&bytes) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(
                        container = %path,
                        error = %e,
                        "Could not extract attachments for archive"
                    );
                    continue;
                }
            };

            let mut nested = Vec::new();
            for attachment in message.attachments {
                let child = format!("{path}{ATTACHMENTS_SUFFIX}/{}", attachment.name);
                if archive.add_file(&source_entry(&child), &attachment.bytes)? {
                    written += 1;
                }
                if is_container(&attachment.name, attachment.mime_type.as_deref()) {
                    nested.push((child, attachment.bytes));
                }
            }
            pending.extend(nested.into_iter().rev());
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use zip::ZipArchive;

    use super::*;
    use crate::export::workbook::CellValue;
    use crate::pipeline::container::msg::fixtures::{build_msg, MsgFixture};
    use crate::config::MAX_FILE_BYTES;
    use crate::pipeline::container::MsgUnpacker;
    use crate::pipeline::import::DocumentSection;
    use crate::pipeline::processor::prepare_batch;
    use crate::pipeline::structuring::{LineItem, PropertyRecord};

    fn open(bytes: Vec<u8>) -> ZipArchive<Cursor<Vec<u8>>> {
        ZipArchive::new(Cursor::new(bytes)).unwrap()
    }

    fn names(archive: &ZipArchive<Cursor<Vec<u8>>>) -> Vec<String> {
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        names
    }

    fn read_entry(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> Vec<u8> {
        let mut out = Vec::new();
        archive.by_name(name).unwrap().read_to_end(&mut out).unwrap();
        out
    }

    fn email() -> Vec<u8> {
        build_msg(
            &MsgFixture::new("Invoices")
                .attach("invoice.pdf", b"%PDF-1.4 invoice".to_vec())
                .attach("memo.txt", b"paid in full".to_vec()),
        )
    }

    #[test]
    fn originals_and_attachments_follow_layout() {
        let originals = vec![
            SourceFile::new("ledger.xlsx", b"xlsx".to_vec()).with_relative_path("Unit 1/ledger.xlsx"),
            SourceFile::new("Email.msg", email()),
        ];
        let bytes = AuditPackager::new(&MsgUnpacker)
            .package(&AnalysisResult::default(), &originals)
            .unwrap();
        let mut archive = open(bytes);

        assert_eq!(
            names(&archive),
            vec![
                "Source_Documents/",
                "Source_Documents/Email.msg",
                "Source_Documents/Email.msg_attachments/invoice.pdf",
                "Source_Documents/Email.msg_attachments/memo.txt",
                "Source_Documents/Unit 1/ledger.xlsx",
                "Tax_Summary.xlsx",
            ]
        );
        assert_eq!(
            read_entry(&mut archive, "Source_Documents/Email.msg_attachments/memo.txt"),
            b"paid in full"
        );
        assert_eq!(
            archive.by_name("Source_Documents/Unit 1/ledger.xlsx").unwrap().compression(),
            CompressionMethod::Deflated
        );
    }

    #[test]
    fn nested_containers_are_expanded() {
        let inner = build_msg(&MsgFixture::new("Fwd").attach("scan.pdf", b"%PDF scan".to_vec()));
        let outer = build_msg(&MsgFixture::new("Outer").attach("Fwd.msg", inner));
        let originals = vec![SourceFile::new("Email.msg", outer)];

        let bytes = AuditPackager::new(&MsgUnpacker)
            .package(&AnalysisResult::default(), &originals)
            .unwrap();
        let archive = open(bytes);

        let names = names(&archive);
        assert!(names.contains(&"Source_Documents/Email.msg_attachments/Fwd.msg".to_string()));
        assert!(names.contains(
            &"Source_Documents/Email.msg_attachments/Fwd.msg_attachments/scan.pdf".to_string()
        ));
    }

    #[test]
    fn corrupt_container_does_not_abort_packaging() {
        let originals = vec![
            SourceFile::new("Broken.msg", b"not a compound file".to_vec()),
            SourceFile::new("Email.msg", email()),
        ];
        let bytes = AuditPackager::new(&MsgUnpacker)
            .package(&AnalysisResult::default(), &originals)
            .unwrap();
        let names = names(&open(bytes));

        assert!(names.contains(&"Source_Documents/Broken.msg".to_string()));
        assert!(!names.iter().any(|n| n.contains("Broken.msg_attachments")));
        assert!(names.contains(&"Source_Documents/Email.msg_attachments/invoice.pdf".to_string()));
    }

    #[test]
    fn email_draft_written_only_when_present() {
        let with_draft = AnalysisResult {
            email_draft: Some("Hi, please send the March bank statement.".into()),
            ..Default::default()
        };
        let mut archive = open(AuditPackager::new(&MsgUnpacker).package(&with_draft, &[]).unwrap());
        assert_eq!(
            read_entry(&mut archive, EMAIL_DRAFT_FILE_NAME),
            b"Hi, please send the March bank statement."
        );

        let archive = open(
            AuditPackager::new(&MsgUnpacker)
                .package(&AnalysisResult::default(), &[])
                .unwrap(),
        );
        assert!(!names(&archive).contains(&EMAIL_DRAFT_FILE_NAME.to_string()));
    }

    #[test]
    fn reference_sections_keep_their_prefix() {
        let originals = vec![
            SourceFile::new("2023 return.pdf", b"%PDF".to_vec()).in_section(DocumentSection::PriorYear)
        ];
        let bytes = AuditPackager::new(&MsgUnpacker)
            .package(&AnalysisResult::default(), &originals)
            .unwrap();
        assert!(names(&open(bytes)).contains(&"Source_Documents/PRIOR/2023 return.pdf".to_string()));
    }

    #[test]
    fn traversal_in_relative_path_is_neutralized() {
        let originals =
            vec![SourceFile::new("x.pdf", b"%PDF".to_vec()).with_relative_path("../../x.pdf")];
        let bytes = AuditPackager::new(&MsgUnpacker)
            .package(&AnalysisResult::default(), &originals)
            .unwrap();
        assert!(names(&open(bytes)).contains(&"Source_Documents/x.pdf".to_string()));
    }

    #[test]
    fn duplicate_attachment_names_keep_first() {
        let bytes = build_msg(
            &MsgFixture::new("Dupes")
                .attach("scan.pdf", b"first".to_vec())
                .attach("scan.pdf", b"second".to_vec()),
        );
        let archive_bytes = AuditPackager::new(&MsgUnpacker)
            .package(&AnalysisResult::default(), &[SourceFile::new("Dupes.msg", bytes)])
            .unwrap();
        let mut archive = open(archive_bytes);
        assert_eq!(
            read_entry(&mut archive, "Source_Documents/Dupes.msg_attachments/scan.pdf"),
            b"first"
        );
    }

    #[test]
    fn every_workbook_link_resolves_inside_archive() {
        let mut property = PropertyRecord {
            address: "12 Elm St".into(),
            ..Default::default()
        };
        property
            .income
            .insert("Rent".into(), LineItem::new(1500.0, "Unit 1/ledger.xlsx"));
        property
            .expenses
            .insert("Repairs".into(), LineItem::new(320.0, "Email.msg > invoice.pdf"));
        let email = build_msg(
            &MsgFixture::new("Invoices")
                .attach("invoice.pdf", b"%PDF-1.4 invoice".to_vec())
                .attach("memo.txt", b"paid in full".to_vec())
                .attach("Rent > March.pdf", b"%PDF-1.4 rent".to_vec()),
        );
        let originals = vec![
            SourceFile::new("ledger.xlsx", b"xlsx".to_vec()).with_relative_path("Unit 1/ledger.xlsx"),
            SourceFile::new("Email.msg", email),
        ];
        let manifest = prepare_batch(&MsgUnpacker, MAX_FILE_BYTES, &originals).manifest;
        assert!(manifest.entries().iter().any(|e| e == "Email.msg > Rent - March.pdf"));
        let result = AnalysisResult {
            properties: vec![property],
            all_files_detected: manifest,
            ..Default::default()
        };

        let archive_names =
            names(&open(AuditPackager::new(&MsgUnpacker).package(&result, &originals).unwrap()));

        let layout = build_workbook(&result);
        let targets: Vec<&str> = layout
            .sheets
            .iter()
            .flat_map(|s| s.rows.iter())
            .flat_map(|r| r.cells.iter())
            .filter_map(|c| match c {
                CellValue::Link { target, .. } => Some(target.as_str()),
                _ => None,
            })
            .collect();

        assert!(!targets.is_empty());
        for target in targets {
            assert!(
                archive_names.iter().any(|n| n == target),
                "link target {target} missing from archive"
            );
        }
    }
}
