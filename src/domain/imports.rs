use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A problem with one CSV row. Row 1 is the header.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RowError {
    pub row: usize,
    pub field: String,
    pub error: String,
}

impl RowError {
    pub fn new(row: usize, field: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            row,
            field: field.into(),
            error: error.into(),
        }
    }
}

/// A validated historical project row
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistoricalProjectRecord {
    pub row: usize,
    pub name: String,
    pub job_number: String,
    pub completion_date: Option<NaiveDate>,
    pub original_bid: Option<f64>,
    pub final_cost: Option<f64>,
    pub profit_margin: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub invalid_rows: usize,
    pub errors: Vec<RowError>,
    /// First few valid rows as they would be imported
    pub preview: Vec<HistoricalProjectRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<RowError>,
}

/// Outcome of a catalog or vendor CSV upload
#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogImportResult {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<RowError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoricalProjectResponse {
    pub id: Uuid,
    pub name: String,
    pub job_number: String,
    pub completion_date: Option<NaiveDate>,
    pub original_bid: Option<f64>,
    pub final_cost: Option<f64>,
    pub profit_margin: Option<f64>,
    pub import_source: String,
    pub notes: Option<String>,
    pub imported_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
