//! CSV parsing and row validation for bulk imports.
//!
//! Header names are matched case-insensitively and cells are trimmed. Row
//! numbers in errors count the header as row 1, matching what a spreadsheet
//! shows.

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::imports::{HistoricalProjectRecord, RowError};
use crate::domain::vendors::VendorCategory;
use crate::error::ApiError;

pub const PROJECT_TEMPLATE_COLUMNS: [&str; 7] = [
    "name",
    "job_number",
    "completion_date",
    "original_bid",
    "final_cost",
    "profit_margin",
    "notes",
];

const PREVIEW_ROWS: usize = 10;

#[derive(Debug, Error)]
pub enum CsvError {
    #[error("Missing required columns: {0}")]
    MissingColumns(String),

    #[error("Failed to read CSV: {0}")]
    Read(#[from] csv::Error),

    #[error("File contains no data rows")]
    Empty,
}

impl From<CsvError> for ApiError {
    fn from(err: CsvError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

// ============================================================================
// Table reading
// ============================================================================

struct Table {
    columns: HashMap<String, usize>,
    rows: Vec<(usize, StringRecord)>,
}

impl Table {
    fn read(bytes: &[u8], required: &[&str]) -> Result<Self, CsvError> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .trim(Trim::All)
            .from_reader(bytes);

        let columns: HashMap<String, usize> = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.to_lowercase(), idx))
            .collect();

        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|c| !columns.contains_key(*c))
            .collect();
        if !missing.is_empty() {
            return Err(CsvError::MissingColumns(missing.join(", ")));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.iter().all(str::is_empty) {
                continue;
            }
            // Blank lines are skipped by the reader, so count physical lines
            let line = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(rows.len() + 2);
            rows.push((line, record));
        }

        if rows.is_empty() {
            return Err(CsvError::Empty);
        }
        Ok(Self { columns, rows })
    }

    fn cell<'r>(&self, record: &'r StringRecord, column: &str) -> Option<&'r str> {
        self.columns
            .get(column)
            .and_then(|idx| record.get(*idx))
            .filter(|v| !v.is_empty())
    }
}

// ============================================================================
// Field parsers
// ============================================================================

/// `YYYY-MM-DD` or `MM/DD/YYYY`
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%m/%d/%Y"))
        .ok()
}

/// Numbers with optional currency sign and thousands separators
pub fn parse_number(value: &str) -> Option<f64> {
    let cleaned: String = value
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn required_text(
    table: &Table,
    record: &StringRecord,
    row: usize,
    column: &str,
    label: &str,
    errors: &mut Vec<RowError>,
) -> Option<String> {
    match table.cell(record, column) {
        Some(v) => Some(v.to_string()),
        None => {
            errors.push(RowError::new(row, column, format!("{} is required", label)));
            None
        }
    }
}

fn optional_number(
    table: &Table,
    record: &StringRecord,
    row: usize,
    column: &str,
    errors: &mut Vec<RowError>,
) -> Option<f64> {
    let raw = table.cell(record, column)?;
    let parsed = parse_number(raw);
    if parsed.is_none() {
        errors.push(RowError::new(row, column, "Must be a number"));
    }
    parsed
}

fn optional_text(table: &Table, record: &StringRecord, column: &str) -> Option<String> {
    table.cell(record, column).map(str::to_string)
}

// ============================================================================
// Historical projects
// ============================================================================

/// Valid rows and row-level errors; a row with any error is excluded.
pub fn validate_historical_projects(
    bytes: &[u8],
) -> Result<(Vec<HistoricalProjectRecord>, Vec<RowError>), CsvError> {
    let table = Table::read(bytes, &["name", "job_number"])?;
    let mut valid = Vec::new();
    let mut errors = Vec::new();

    for (row, record) in &table.rows {
        let row = *row;
        let mut row_errors = Vec::new();

        let name = required_text(&table, record, row, "name", "Name", &mut row_errors);
        let job_number =
            required_text(&table, record, row, "job_number", "Job number", &mut row_errors);

        let completion_date = table.cell(record, "completion_date").and_then(|raw| {
            let parsed = parse_date(raw);
            if parsed.is_none() {
                row_errors.push(RowError::new(
                    row,
                    "completion_date",
                    "Invalid date format (use YYYY-MM-DD or MM/DD/YYYY)",
                ));
            }
            parsed
        });

        let original_bid = optional_number(&table, record, row, "original_bid", &mut row_errors);
        let final_cost = optional_number(&table, record, row, "final_cost", &mut row_errors);
        let profit_margin = optional_number(&table, record, row, "profit_margin", &mut row_errors);
        if matches!(profit_margin, Some(m) if !(-100.0..=100.0).contains(&m)) {
            row_errors.push(RowError::new(
                row,
                "profit_margin",
                "Must be between -100 and 100",
            ));
        }

        match (name, job_number, row_errors.is_empty()) {
            (Some(name), Some(job_number), true) => valid.push(HistoricalProjectRecord {
                row,
                name,
                job_number,
                completion_date,
                original_bid,
                final_cost,
                profit_margin,
                notes: optional_text(&table, record, "notes"),
            }),
            _ => errors.extend(row_errors),
        }
    }

    Ok((valid, errors))
}

/// Leading valid rows shown back to the user before import
pub fn preview(rows: &[HistoricalProjectRecord]) -> Vec<HistoricalProjectRecord> {
    rows.iter().take(PREVIEW_ROWS).cloned().collect()
}

/// Header plus one example row
pub fn projects_template() -> Result<Vec<u8>, CsvError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(PROJECT_TEMPLATE_COLUMNS)?;
    writer.write_record([
        "Highway 101 Widening",
        "JOB-2023-001",
        "2023-12-31",
        "1500000",
        "1450000",
        "3.45",
        "Completed ahead of schedule",
    ])?;
    writer
        .into_inner()
        .map_err(|e| CsvError::Read(csv::Error::from(e.into_error())))
}

// ============================================================================
// Catalog and vendors
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct MaterialRow {
    pub row: usize,
    pub product_code: String,
    pub description: String,
    pub category: String,
    pub unit_price: f64,
    pub unit: String,
    pub manufacturer: Option<String>,
    pub notes: Option<String>,
}

pub fn parse_materials(bytes: &[u8]) -> Result<(Vec<MaterialRow>, Vec<RowError>), CsvError> {
    let table = Table::read(
        bytes,
        &["product_code", "description", "category", "unit_price", "unit"],
    )?;
    let mut valid = Vec::new();
    let mut errors = Vec::new();

    for (row, record) in &table.rows {
        let row = *row;
        let mut row_errors = Vec::new();

        let product_code =
            required_text(&table, record, row, "product_code", "Product code", &mut row_errors);
        let description =
            required_text(&table, record, row, "description", "Description", &mut row_errors);
        let category = required_text(&table, record, row, "category", "Category", &mut row_errors);
        let unit = required_text(&table, record, row, "unit", "Unit", &mut row_errors)
            .map(|u| u.to_uppercase());

        let unit_price = match table.cell(record, "unit_price").map(parse_number) {
            Some(Some(price)) if price >= 0.0 => Some(price),
            Some(Some(_)) => {
                row_errors.push(RowError::new(row, "unit_price", "Must not be negative"));
                None
            }
            Some(None) => {
                row_errors.push(RowError::new(row, "unit_price", "Must be a number"));
                None
            }
            None => {
                row_errors.push(RowError::new(row, "unit_price", "Unit price is required"));
                None
            }
        };

        match (product_code, description, category, unit, unit_price) {
            (Some(product_code), Some(description), Some(category), Some(unit), Some(unit_price))
                if row_errors.is_empty() =>
            {
                valid.push(MaterialRow {
                    row,
                    product_code,
                    description,
                    category,
                    unit_price,
                    unit,
                    manufacturer: optional_text(&table, record, "manufacturer"),
                    notes: optional_text(&table, record, "notes"),
                })
            }
            _ => errors.extend(row_errors),
        }
    }

    Ok((valid, errors))
}

#[derive(Debug, Clone, PartialEq)]
pub struct VendorRow {
    pub row: usize,
    pub name: String,
    pub category: VendorCategory,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
}

pub fn parse_vendors(bytes: &[u8]) -> Result<(Vec<VendorRow>, Vec<RowError>), CsvError> {
    let table = Table::read(bytes, &["name", "category"])?;
    let mut valid = Vec::new();
    let mut errors = Vec::new();

    for (row, record) in &table.rows {
        let row = *row;
        let mut row_errors = Vec::new();

        let name = required_text(&table, record, row, "name", "Name", &mut row_errors);
        let category = match table.cell(record, "category") {
            Some(raw) => {
                let parsed = VendorCategory::parse(raw);
                if parsed.is_none() {
                    row_errors.push(RowError::new(
                        row,
                        "category",
                        format!("Unknown vendor category '{}'", raw),
                    ));
                }
                parsed
            }
            None => {
                row_errors.push(RowError::new(row, "category", "Category is required"));
                None
            }
        };

        let email = optional_text(&table, record, "email");
        if matches!(&email, Some(e) if !e.contains('@')) {
            row_errors.push(RowError::new(row, "email", "Invalid email address"));
        }

        match (name, category) {
            (Some(name), Some(category)) if row_errors.is_empty() => valid.push(VendorRow {
                row,
                name,
                category,
                contact_name: optional_text(&table, record, "contact_name"),
                email,
                phone: optional_text(&table, record, "phone"),
                city: optional_text(&table, record, "city"),
                state: optional_text(&table, record, "state"),
            }),
            _ => errors.extend(row_errors),
        }
    }

    Ok((valid, errors))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_in_both_formats() {
        assert_eq!(parse_date("2023-12-31"), NaiveDate::from_ymd_opt(2023, 12, 31));
        assert_eq!(parse_date("12/31/2023"), NaiveDate::from_ymd_opt(2023, 12, 31));
        assert_eq!(parse_date("31/12/2023"), None);
        assert_eq!(parse_date("last spring"), None);
    }

    #[test]
    fn numbers_with_currency_formatting() {
        assert_eq!(parse_number("$1,500,000"), Some(1_500_000.0));
        assert_eq!(parse_number("-3.5"), Some(-3.5));
        assert_eq!(parse_number("n/a"), None);
    }

    #[test]
    fn historical_rows_report_errors_by_spreadsheet_row() {
        let csv = "\u{feff}Name,Job_Number,completion_date,original_bid,final_cost,profit_margin,notes\n\
                   Highway 101 Widening,JOB-1,2023-12-31,\"1,500,000\",1450000,3.45,on time\n\
                   ,JOB-2,01/15/2024,100,90,10,\n\
                   Bridge Deck,JOB-3,yesterday,abc,90,150,\n\
                   ,,,,,,\n\
                   Parking Lot,JOB-4,,,,,\n";

        let (valid, errors) = validate_historical_projects(csv.as_bytes()).unwrap();

        assert_eq!(valid.len(), 2);
        assert_eq!(valid[0].row, 2);
        assert_eq!(valid[0].original_bid, Some(1_500_000.0));
        assert_eq!(valid[0].notes.as_deref(), Some("on time"));
        assert_eq!(valid[1].row, 6);
        assert_eq!(valid[1].completion_date, None);

        assert_eq!(
            errors,
            vec![
                RowError::new(3, "name", "Name is required"),
                RowError::new(
                    4,
                    "completion_date",
                    "Invalid date format (use YYYY-MM-DD or MM/DD/YYYY)"
                ),
                RowError::new(4, "original_bid", "Must be a number"),
                RowError::new(4, "profit_margin", "Must be between -100 and 100"),
            ]
        );
    }

    #[test]
    fn blank_lines_keep_later_row_numbers() {
        let csv = "name,job_number,completion_date\nA,J1,2024-01-01\n\nB,J2,not-a-date\n";

        let (valid, errors) = validate_historical_projects(csv.as_bytes()).unwrap();

        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].row, 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].row, 4);
        assert_eq!(errors[0].field, "completion_date");
    }

    #[test]
    fn missing_required_columns_fail_the_file() {
        let err = validate_historical_projects(b"name,completion_date\nX,2024-01-01\n").unwrap_err();
        assert_eq!(err.to_string(), "Missing required columns: job_number");
        assert!(matches!(
            validate_historical_projects(b"name,job_number\n"),
            Err(CsvError::Empty)
        ));
    }

    #[test]
    fn template_parses_cleanly() {
        let template = projects_template().unwrap();
        let text = String::from_utf8(template.clone()).unwrap();
        assert_eq!(
            text.lines().next(),
            Some("name,job_number,completion_date,original_bid,final_cost,profit_margin,notes")
        );
        let (valid, errors) = validate_historical_projects(&template).unwrap();
        assert_eq!(valid.len(), 1);
        assert!(errors.is_empty());
    }

    #[test]
    fn material_rows() {
        let csv = "product_code,description,category,unit_price,unit,manufacturer\n\
                   LBR-2X4-8,2x4x8 SPF Stud,Walls,4.25,ea,Weyerhaeuser\n\
                   OSB-716,7/16 OSB,Walls,-1,SHT,\n\
                   ,Missing code,Walls,abc,EA,\n";
        let (valid, errors) = parse_materials(csv.as_bytes()).unwrap();
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].unit, "EA");
        assert_eq!(valid[0].manufacturer.as_deref(), Some("Weyerhaeuser"));
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0], RowError::new(3, "unit_price", "Must not be negative"));
        assert_eq!(errors[1].row, 4);
        assert_eq!(errors[1].field, "product_code");
        assert_eq!(errors[2].field, "unit_price");
    }

    #[test]
    fn vendor_rows() {
        let csv = "name,category,email,city\n\
                   Gulf Lumber,Material Supplier,sales@gulf.test,Lafayette\n\
                   Crane Co,heavy lift,,\n\
                   Bad Mail,rental,nope,\n";
        let (valid, errors) = parse_vendors(csv.as_bytes()).unwrap();
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].category, VendorCategory::MaterialSupplier);
        assert_eq!(valid[0].city.as_deref(), Some("Lafayette"));
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "category");
        assert_eq!(errors[1], RowError::new(4, "email", "Invalid email address"));
    }
}
