//! Workbook layout: what goes in which cell, independent of the file format.
//!
//! One sheet per property plus a final audit sheet. Totals, variances and the net row
//! are live formulas; each formula also carries its computed value so readers that do
//! not recalculate still show the right numbers.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::source_document_link;
use crate::config::{PRIOR_YEAR_PREFIX, TEMPLATE_PREFIX};
use crate::pipeline::structuring::{AnalysisResult, LineItem, PropertyRecord};
use crate::pipeline::types::Manifest;

/// Excel's hard limit on sheet-name length.
pub const MAX_SHEET_NAME_CHARS: usize = 31;
pub const AUDIT_SHEET_NAME: &str = "Audit Trail";

/// Column headers of the income and expense blocks (A..E).
pub const VALUE_COLUMNS: [&str; 4] = ["Prior Year", "Current Year", "Variance", "Source File"];

pub const TOTAL_INCOME_LABEL: &str = "TOTAL INCOME";
pub const TOTAL_EXPENSES_LABEL: &str = "TOTAL EXPENSES";
pub const NET_LABEL: &str = "NET RENTAL INCOME";

/// Names Excel refuses regardless of case.
const RESERVED_SHEET_NAMES: [&str; 2] = [AUDIT_SHEET_NAME, "History"];

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    /// Formula text (with leading `=`) and its computed result.
    Formula { expr: String, value: f64 },
    /// Display text and an archive-relative hyperlink target.
    Link { text: String, target: String },
}

impl CellValue {
    fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    fn formula(expr: String, value: f64) -> Self {
        Self::Formula { expr, value }
    }

    /// Numeric value of a number or formula cell.
    pub fn numeric(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Formula { value, .. } => Some(*value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Title,
    Blank,
    SectionHeader,
    Data,
    Total,
    Net,
    Note,
    FileEntry,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub kind: RowKind,
    /// Cells from column A onwards.
    pub cells: Vec<CellValue>,
}

impl Row {
    pub fn label(&self) -> Option<&str> {
        match self.cells.first() {
            Some(CellValue::Text(s)) => Some(s),
            Some(CellValue::Link { text, .. }) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SheetLayout {
    pub name: String,
    pub rows: Vec<Row>,
}

impl SheetLayout {
    /// First row with the given label, with its 1-based spreadsheet row number.
    pub fn find_row(&self, label: &str) -> Option<(u32, &Row)> {
        self.rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.label() == Some(label))
            .map(|(i, row)| (i as u32 + 1, row))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SummaryWorkbook {
    pub sheets: Vec<SheetLayout>,
}

impl SummaryWorkbook {
    pub fn sheet(&self, name: &str) -> Option<&SheetLayout> {
        self.sheets.iter().find(|s| s.name == name)
    }
}

// ──────────────────────────────────────────────
// Building
// ──────────────────────────────────────────────

/// Lay out one sheet per property, then the audit trail.
pub fn build_workbook(result: &AnalysisResult) -> SummaryWorkbook {
    let mut taken: HashSet<String> = RESERVED_SHEET_NAMES
        .iter()
        .map(|n| n.to_lowercase())
        .collect();

    let mut sheets: Vec<SheetLayout> = result
        .properties
        .iter()
        .enumerate()
        .map(|(i, property)| {
            let name = unique_sheet_name(&sanitize_sheet_name(&property.address, i + 1), &mut taken);
            property_sheet(name, property, result.tax_year)
        })
        .collect();

    sheets.push(audit_sheet(&result.all_files_detected, &result.properties, result.tax_year));

    tracing::debug!(sheets = sheets.len(), "Workbook layout built");
    SummaryWorkbook { sheets }
}

#[derive(Default)]
struct SheetBuilder {
    rows: Vec<Row>,
}

impl SheetBuilder {
    /// 1-based row number the next pushed row will occupy.
    fn next_row(&self) -> u32 {
        self.rows.len() as u32 + 1
    }

    fn push(&mut self, kind: RowKind, cells: Vec<CellValue>) -> u32 {
        let row = self.next_row();
        self.rows.push(Row { kind, cells });
        row
    }

    fn blank(&mut self) {
        self.push(RowKind::Blank, Vec::new());
    }

    fn finish(self, name: String) -> SheetLayout {
        SheetLayout {
            name,
            rows: self.rows,
        }
    }
}

/// Row number and values of a TOTAL row.
struct BlockTotal {
    row: u32,
    prior: f64,
    current: f64,
}

fn property_sheet(name: String, property: &PropertyRecord, tax_year: Option<i32>) -> SheetLayout {
    let mut sheet = SheetBuilder::default();

    let address = if property.address.trim().is_empty() {
        name.as_str()
    } else {
        property.address.trim()
    };
    let title = match tax_year {
        Some(year) => format!("Rental Income & Expenses: {address} (Tax Year {year})"),
        None => format!("Rental Income & Expenses: {address}"),
    };
    sheet.push(RowKind::Title, vec![CellValue::text(title)]);
    sheet.blank();

    let income = push_block(
        &mut sheet,
        "INCOME",
        TOTAL_INCOME_LABEL,
        &property.income,
        &property.income_prior,
    );
    sheet.blank();
    let expenses = push_block(
        &mut sheet,
        "EXPENSES",
        TOTAL_EXPENSES_LABEL,
        &property.expenses,
        &property.expenses_prior,
    );
    sheet.blank();

    let net_row = sheet.next_row();
    let net_prior = income.prior - expenses.prior;
    let net_current = income.current - expenses.current;
    sheet.push(
        RowKind::Net,
        vec![
            CellValue::text(NET_LABEL),
            CellValue::formula(format!("=B{}-B{}", income.row, expenses.row), net_prior),
            CellValue::formula(format!("=C{}-C{}", income.row, expenses.row), net_current),
            CellValue::formula(format!("=C{net_row}-B{net_row}"), net_current - net_prior),
        ],
    );

    let notes: Vec<&str> = property
        .notes
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if !notes.is_empty() {
        sheet.blank();
        sheet.push(RowKind::SectionHeader, vec![CellValue::text("NOTES")]);
        for line in notes {
            sheet.push(RowKind::Note, vec![CellValue::text(line)]);
        }
    }

    sheet.blank();
    sheet.push(RowKind::SectionHeader, vec![CellValue::text("FILES PROCESSED")]);
    for file in &property.source_files_read {
        sheet.push(RowKind::FileEntry, vec![CellValue::text(file.trim())]);
    }

    sheet.finish(name)
}

/// Header, one row per category (sorted), then the TOTAL row.
fn push_block(
    sheet: &mut SheetBuilder,
    heading: &str,
    total_label: &str,
    current: &BTreeMap<String, LineItem>,
    prior: &BTreeMap<String, f64>,
) -> BlockTotal {
    let mut header = vec![CellValue::text(heading)];
    header.extend(VALUE_COLUMNS.iter().map(|c| CellValue::text(*c)));
    sheet.push(RowKind::SectionHeader, header);

    let categories: BTreeSet<&String> = current.keys().chain(prior.keys()).collect();
    let first = sheet.next_row();
    let (mut prior_sum, mut current_sum) = (0.0, 0.0);

    for category in &categories {
        let prior_amount = prior.get(*category).copied().unwrap_or(0.0);
        let item = current.get(*category);
        let current_amount = item.map(|i| i.amount).unwrap_or(0.0);
        let source = item.map(|i| i.source_file.trim()).unwrap_or("");
        prior_sum += prior_amount;
        current_sum += current_amount;

        let r = sheet.next_row();
        sheet.push(
            RowKind::Data,
            vec![
                CellValue::text(category.as_str()),
                CellValue::Number(prior_amount),
                CellValue::Number(current_amount),
                CellValue::formula(format!("=C{r}-B{r}"), current_amount - prior_amount),
                source_cell(source),
            ],
        );
    }

    let total_row = sheet.next_row();
    let (prior_cell, current_cell) = if categories.is_empty() {
        (CellValue::Number(0.0), CellValue::Number(0.0))
    } else {
        let last = total_row - 1;
        (
            CellValue::formula(format!("=SUM(B{first}:B{last})"), prior_sum),
            CellValue::formula(format!("=SUM(C{first}:C{last})"), current_sum),
        )
    };
    sheet.push(
        RowKind::Total,
        vec![
            CellValue::text(total_label),
            prior_cell,
            current_cell,
            CellValue::formula(
                format!("=C{total_row}-B{total_row}"),
                current_sum - prior_sum,
            ),
        ],
    );

    BlockTotal {
        row: total_row,
        prior: prior_sum,
        current: current_sum,
    }
}

fn source_cell(source: &str) -> CellValue {
    if source.is_empty() {
        CellValue::text("")
    } else {
        CellValue::Link {
            text: source.to_string(),
            target: source_document_link(source),
        }
    }
}

fn audit_sheet(manifest: &Manifest, properties: &[PropertyRecord], tax_year: Option<i32>) -> SheetLayout {
    let mut sheet = SheetBuilder::default();
    let title = match tax_year {
        Some(year) => format!("{AUDIT_SHEET_NAME} (Tax Year {year})"),
        None => AUDIT_SHEET_NAME.to_string(),
    };
    sheet.push(RowKind::Title, vec![CellValue::text(title)]);
    sheet.blank();

    let cited = cited_sources(properties);
    sheet.push(
        RowKind::SectionHeader,
        vec![
            CellValue::text(format!("ALL FILES DETECTED ({})", manifest.len())),
            CellValue::text("Status"),
        ],
    );
    if manifest.is_empty() {
        sheet.push(RowKind::FileEntry, vec![CellValue::text("None")]);
    }
    for entry in manifest.entries() {
        let status = if is_reference_only(entry) {
            "Reference"
        } else if cited.contains(entry.as_str()) {
            "Cited"
        } else {
            "Not cited"
        };
        sheet.push(
            RowKind::FileEntry,
            vec![source_cell(entry), CellValue::text(status)],
        );
    }

    let unused = compute_unused(manifest, properties);
    sheet.blank();
    sheet.push(
        RowKind::SectionHeader,
        vec![CellValue::text(format!("UNUSED FILES - REVIEW ({})", unused.len()))],
    );
    if unused.is_empty() {
        sheet.push(RowKind::FileEntry, vec![CellValue::text("None")]);
    }
    for entry in &unused {
        sheet.push(RowKind::FileEntry, vec![source_cell(entry)]);
    }

    sheet.finish(AUDIT_SHEET_NAME.to_string())
}

// ──────────────────────────────────────────────
// Audit helpers
// ──────────────────────────────────────────────

fn cited_sources(properties: &[PropertyRecord]) -> HashSet<&str> {
    properties.iter().flat_map(|p| p.cited_sources()).collect()
}

fn is_reference_only(entry: &str) -> bool {
    entry.starts_with(PRIOR_YEAR_PREFIX) || entry.starts_with(TEMPLATE_PREFIX)
}

/// Manifest entries no income or expense line cites, excluding reference-only documents.
///
/// Matching is exact: a citation must repeat the manifest path verbatim.
pub fn compute_unused(manifest: &Manifest, properties: &[PropertyRecord]) -> Vec<String> {
    let cited = cited_sources(properties);
    manifest
        .entries()
        .iter()
        .filter(|entry| !cited.contains(entry.as_str()) && !is_reference_only(entry))
        .cloned()
        .collect()
}

// ──────────────────────────────────────────────
// Sheet names
// ──────────────────────────────────────────────

/// Strip characters Excel rejects and truncate; `Prop <n>` when nothing is left.
pub fn sanitize_sheet_name(raw: &str, index: usize) -> String {
    let replaced: String = raw
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| {
            if matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\') {
                ' '
            } else {
                c
            }
        })
        .collect();
    let trimmed = replaced.trim().trim_matches('\'').trim();
    let truncated: String = trimmed.chars().take(MAX_SHEET_NAME_CHARS).collect();
    let name = truncated.trim_end();

    if name.is_empty() {
        format!("Prop {index}")
    } else {
        name.to_string()
    }
}

/// `base`, or `base (2)`, `base (3)`, ... trimmed to fit; comparison ignores case.
fn unique_sheet_name(base: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(base.to_lowercase()) {
        return base.to_string();
    }

    let mut n = 2;
    loop {
        let suffix = format!(" ({n})");
        let keep = MAX_SHEET_NAME_CHARS.saturating_sub(suffix.chars().count());
        let stem: String = base.chars().take(keep).collect();
        let candidate = format!("{}{suffix}", stem.trim_end());
        if taken.insert(candidate.to_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}
