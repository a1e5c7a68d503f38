//! Export: the summary workbook and the audit archive that carries it.

pub mod workbook;
pub mod xlsx;
pub mod package;

pub use workbook::*;
pub use xlsx::*;
pub use package::*;

use thiserror::Error;

use crate::config::{ATTACHMENTS_SUFFIX, PATH_SEPARATOR, SOURCE_DOCUMENTS_DIR};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Could not create archive folder {folder}: {reason}")]
    FolderCreation { folder: String, reason: String },

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Workbook error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where an attachment breadcrumb lives inside `Source_Documents/`.
///
/// `Email.msg > invoice.pdf` becomes `Email.msg_attachments/invoice.pdf`.
pub fn archive_link_path(source: &str) -> String {
    source
        .trim()
        .replace(PATH_SEPARATOR, &format!("{ATTACHMENTS_SUFFIX}/"))
        .replace('\\', "/")
}

/// Drop empty, `.` and `..` segments so no entry escapes the archive root.
pub fn clean_archive_path(path: &str) -> String {
    path.split(['/', '\\'])
        .map(str::trim)
        .filter(|seg| !seg.is_empty() && *seg != "." && *seg != "..")
        .collect::<Vec<_>>()
        .join("/")
}

/// Archive-relative target of a workbook hyperlink for a manifest path.
pub fn source_document_link(source: &str) -> String {
    format!(
        "{SOURCE_DOCUMENTS_DIR}/{}",
        clean_archive_path(&archive_link_path(source))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breadcrumb_becomes_attachment_folder() {
        assert_eq!(
            archive_link_path("Email.msg > invoice.pdf"),
            "Email.msg_attachments/invoice.pdf"
        );
    }

    #[test]
    fn nested_breadcrumbs_rewrite_every_level() {
        assert_eq!(
            archive_link_path("Inbox/Email.msg > Fwd.msg > scan.pdf"),
            "Inbox/Email.msg_attachments/Fwd.msg_attachments/scan.pdf"
        );
    }

    #[test]
    fn rewrite_is_stable_on_rewritten_paths() {
        let once = archive_link_path("Email.msg > invoice.pdf");
        assert_eq!(archive_link_path(&once), once);
    }

    #[test]
    fn backslashes_become_forward_slashes() {
        assert_eq!(archive_link_path("Unit 1\\bank.csv"), "Unit 1/bank.csv");
    }

    #[test]
    fn clean_path_strips_traversal() {
        assert_eq!(clean_archive_path("../../etc/passwd"), "etc/passwd");
        assert_eq!(clean_archive_path("/a/./b//c.pdf"), "a/b/c.pdf");
    }

    #[test]
    fn link_targets_source_documents() {
        assert_eq!(
            source_document_link("PRIOR/2023 return.pdf"),
            "Source_Documents/PRIOR/2023 return.pdf"
        );
    }
}
