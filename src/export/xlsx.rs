use rust_xlsxwriter::{Format, FormatBorder, Formula, Workbook, Worksheet};

use super::workbook::{CellValue, Row, RowKind, SheetLayout, SummaryWorkbook};
use super::ExportError;

/// Fixed two-decimal thousands format for the three value columns.
pub const MONEY_FORMAT: &str = "#,##0.00";

/// Excel's per-cell string limit.
const MAX_CELL_CHARS: usize = 32_767;

const COLUMN_WIDTHS: [f64; 5] = [42.0, 16.0, 16.0, 16.0, 60.0];

/// Columns B..D hold amounts.
fn is_value_column(col: u16) -> bool {
    (1..=3).contains(&col)
}

struct Styles {
    title: Format,
    header: Format,
    bold: Format,
    plain: Format,
    money: Format,
    money_bold: Format,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Format::new().set_bold().set_font_size(14),
            header: Format::new().set_bold().set_border_bottom(FormatBorder::Thin),
            bold: Format::new().set_bold(),
            plain: Format::new(),
            money: Format::new().set_num_format(MONEY_FORMAT),
            money_bold: Format::new()
                .set_bold()
                .set_num_format(MONEY_FORMAT)
                .set_border_top(FormatBorder::Thin),
        }
    }

    fn text_for(&self, kind: RowKind) -> &Format {
        match kind {
            RowKind::Title => &self.title,
            RowKind::SectionHeader => &self.header,
            RowKind::Total | RowKind::Net => &self.bold,
            _ => &self.plain,
        }
    }

    fn number_for(&self, kind: RowKind, col: u16) -> &Format {
        match (kind, is_value_column(col)) {
            (RowKind::Total | RowKind::Net, true) => &self.money_bold,
            (_, true) => &self.money,
            (kind, false) => self.text_for(kind),
        }
    }
}

/// Serialize a laid-out workbook to xlsx bytes.
pub fn render_xlsx(layout: &SummaryWorkbook) -> Result<Vec<u8>, ExportError> {
    let styles = Styles::new();
    let mut workbook = Workbook::new();

    for sheet in &layout.sheets {
        let worksheet = workbook.add_worksheet();
        render_sheet(worksheet, sheet, &styles)?;
    }

    let bytes = workbook.save_to_buffer()?;
    tracing::debug!(
        sheets = layout.sheets.len(),
        size = bytes.len(),
        "Workbook rendered"
    );
    Ok(bytes)
}

fn render_sheet(
    worksheet: &mut Worksheet,
    sheet: &SheetLayout,
    styles: &Styles,
) -> Result<(), ExportError> {
    worksheet.set_name(&sheet.name)?;
    for (col, width) in COLUMN_WIDTHS.iter().enumerate() {
        worksheet.set_column_width(col as u16, *width)?;
    }

    for (r, row) in sheet.rows.iter().enumerate() {
        render_row(worksheet, r as u32, row, styles)?;
    }
    Ok(())
}

fn render_row(
    worksheet: &mut Worksheet,
    row_idx: u32,
    row: &Row,
    styles: &Styles,
) -> Result<(), ExportError> {
    for (c, cell) in row.cells.iter().enumerate() {
        let col = c as u16;
        match cell {
            CellValue::Text(text) => {
                if text.is_empty() {
                    continue;
                }
                worksheet.write_string_with_format(
                    row_idx,
                    col,
                    fit_cell(text),
                    styles.text_for(row.kind),
                )?;
            }
            CellValue::Number(n) => {
                worksheet.write_number_with_format(
                    row_idx,
                    col,
                    *n,
                    styles.number_for(row.kind, col),
                )?;
            }
            CellValue::Formula { expr, value } => {
                let formula = Formula::new(expr.as_str()).set_result(value.to_string());
                worksheet.write_formula_with_format(
                    row_idx,
                    col,
                    formula,
                    styles.number_for(row.kind, col),
                )?;
            }
            CellValue::Link { text, target } => {
                let url = format!("file:///{target}");
                let written = worksheet
                    .write_url_with_text(row_idx, col, url.as_str(), fit_cell(text))
                    .map(|_| ());
                if let Err(e) = written {
                    // Over-long or otherwise rejected links degrade to plain text.
                    tracing::warn!(
                        sheet = %worksheet.name(),
                        row = row_idx + 1,
                        error = %e,
                        "Hyperlink rejected, writing text only"
                    );
                    worksheet.write_string_with_format(
                        row_idx,
                        col,
                        fit_cell(text),
                        styles.text_for(row.kind),
                    )?;
                }
            }
        }
    }
    Ok(())
}

fn fit_cell(text: &str) -> String {
    text.chars().take(MAX_CELL_CHARS).collect()
}
