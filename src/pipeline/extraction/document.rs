use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;

use super::plain::sanitize_extracted_text;
use super::ExtractionError;

const DOCUMENT_PART: &str = "word/document.xml";

/// Extract the body text of a Word document.
///
/// Reads `word/document.xml` from the OOXML package: one line per paragraph, tabs
/// and line breaks kept. Legacy binary `.doc` files are not OOXML packages and fail
/// here with a `Document` error, which the caller isolates.
pub fn extract_document_text(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractionError::Document(format!("not a Word package: {e}")))?;

    let mut xml = String::new();
    archive
        .by_name(DOCUMENT_PART)
        .map_err(|_| ExtractionError::MissingBody(DOCUMENT_PART))?
        .read_to_string(&mut xml)?;

    let text = document_xml_to_text(&xml)?;
    Ok(sanitize_extracted_text(&text))
}

fn document_xml_to_text(xml: &str) -> Result<String, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if e.name().as_ref() == b"w:t" {
                    in_text = true;
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => out.push('\n'),
                b"w:tc" => out.push('\t'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:tab" => out.push('\t'),
                b"w:br" | b"w:cr" | b"w:p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t
                    .unescape()
                    .map_err(|e| ExtractionError::Document(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ExtractionError::Document(format!(
                    "XML error at position {}: {e}",
                    reader.buffer_position()
                )))
            }
            _ => {}
        }
    }

    Ok(out)
}
