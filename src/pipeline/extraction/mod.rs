pub mod document;
pub mod plain;
pub mod tabular;

pub use document::*;
pub use plain::*;
pub use tabular::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Spreadsheet parsing failed: {0}")]
    Spreadsheet(String),

    #[error("Document parsing failed: {0}")]
    Document(String),

    #[error("Document has no body part ({0})")]
    MissingBody(&'static str),
}

/// Wrap extracted text with the header the model uses to attribute it to a file.
pub fn file_content_block(path: &str, text: &str) -> String {
    format!("FILE CONTENT ({path}):\n{text}")
}
