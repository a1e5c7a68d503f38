use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};

use super::plain::decode_plain_text;
use super::ExtractionError;
use crate::pipeline::import::format::extension_of;

/// Sheet name given to a CSV file, which has exactly one unnamed sheet.
const CSV_SHEET_NAME: &str = "Sheet1";

/// Render every sheet of a spreadsheet (xlsx, xls) or a CSV file as comma-delimited text.
///
/// Each sheet is prefixed with `Sheet: <name>` and sheets are separated by a blank line.
pub fn extract_tabular_text(filename: &str, bytes: &[u8]) -> Result<String, ExtractionError> {
    if extension_of(filename).as_deref() == Some("csv") {
        return Ok(render_sheet(CSV_SHEET_NAME, &decode_plain_text(bytes)));
    }

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| ExtractionError::Spreadsheet(e.to_string()))?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| ExtractionError::Spreadsheet(format!("sheet {name}: {e}")))?;

        let rows: Vec<String> = range
            .rows()
            .map(|row| row.iter().map(format_cell).collect::<Vec<_>>().join(","))
            .collect();
        sheets.push(render_sheet(&name, &rows.join("\n")));
    }

    Ok(sheets.join("\n\n"))
}

fn render_sheet(name: &str, body: &str) -> String {
    format!("Sheet: {name}\n{body}")
}

fn format_cell(cell: &Data) -> String {
    let value = match cell {
        Data::Empty => return String::new(),
        other => other.to_string(),
    };
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    fn two_sheet_workbook() -> Vec<u8> {
        let mut workbook = Workbook::new();
        let rent = workbook.add_worksheet();
        rent.set_name("Rent").unwrap();
        rent.write_string(0, 0, "Month").unwrap();
        rent.write_string(0, 1, "Amount").unwrap();
        rent.write_string(1, 0, "January").unwrap();
        rent.write_number(1, 1, 1500).unwrap();

        let repairs = workbook.add_worksheet();
        repairs.set_name("Repairs").unwrap();
        repairs.write_string(0, 0, "Roof, gutters").unwrap();
        repairs.write_number(0, 1, 320.5).unwrap();

        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn renders_every_sheet_with_its_name() {
        let text = extract_tabular_text("rent roll.xlsx", &two_sheet_workbook()).unwrap();
        assert_eq!(
            text,
            "Sheet: Rent\nMonth,Amount\nJanuary,1500\n\nSheet: Repairs\n\"Roof, gutters\",320.5"
        );
    }

    #[test]
    fn csv_is_passed_through_as_one_sheet() {
        let text = extract_tabular_text("BANK.CSV", b"date,amount\r\n2024-01-02,1500\r\n").unwrap();
        assert_eq!(text, "Sheet: Sheet1\ndate,amount\n2024-01-02,1500");
    }

    #[test]
    fn corrupt_workbook_is_an_error() {
        let result = extract_tabular_text("broken.xlsx", b"PK\x03\x04 not really");
        assert!(matches!(result, Err(ExtractionError::Spreadsheet(_))));
    }

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(
            format_cell(&Data::String("5\" pipe".into())),
            "\"5\"\" pipe\""
        );
        assert_eq!(format_cell(&Data::Empty), "");
    }
}
