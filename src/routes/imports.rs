//! Historical project CSV imports.

use axum::{
    extract::{Multipart, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use super::read_file_field;
use crate::api::{DataResponse, FileDownload, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireTenant;
use crate::domain::imports::{HistoricalProjectResponse, ImportResult, RowError, ValidationReport};
use crate::domain::{decimal_to_f64, f64_to_decimal};
use crate::error::ApiError;
use crate::services::csv_import;

#[derive(Debug, sqlx::FromRow)]
struct HistoricalProjectRow {
    id: Uuid,
    name: String,
    job_number: String,
    completion_date: Option<NaiveDate>,
    original_bid: Option<Decimal>,
    final_cost: Option<Decimal>,
    profit_margin: Option<Decimal>,
    import_source: String,
    notes: Option<String>,
    imported_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl From<HistoricalProjectRow> for HistoricalProjectResponse {
    fn from(row: HistoricalProjectRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            job_number: row.job_number,
            completion_date: row.completion_date,
            original_bid: row.original_bid.map(decimal_to_f64),
            final_cost: row.final_cost.map(decimal_to_f64),
            profit_margin: row.profit_margin.map(decimal_to_f64),
            import_source: row.import_source,
            notes: row.notes,
            imported_by: row.imported_by,
            created_at: row.created_at,
        }
    }
}

/// Number of distinct rows that had at least one error
fn rejected_rows(errors: &[RowError]) -> usize {
    errors.iter().map(|e| e.row).collect::<BTreeSet<_>>().len()
}

/// GET /imports/projects/template
pub async fn project_template() -> Result<impl IntoResponse, ApiError> {
    let bytes = csv_import::projects_template()?;
    Ok(FileDownload::csv(bytes, "historical_projects_template.csv"))
}

/// POST /imports/projects/validate
pub async fn validate_project_import(
    State(state): State<Arc<AppState>>,
    _tenant: RequireTenant,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = read_file_field(multipart, state.settings.max_upload_bytes).await?;
    let (valid, errors) = csv_import::validate_historical_projects(&bytes)?;
    let invalid_rows = rejected_rows(&errors);

    Ok(Json(DataResponse::new(ValidationReport {
        total_rows: valid.len() + invalid_rows,
        valid_rows: valid.len(),
        invalid_rows,
        preview: csv_import::preview(&valid),
        errors,
    })))
}

/// POST /imports/projects
///
/// Valid rows are inserted together; rows with errors are skipped and reported.
pub async fn import_projects(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = read_file_field(multipart, state.settings.max_upload_bytes).await?;
    let (valid, errors) = csv_import::validate_historical_projects(&bytes)?;

    let mut tx = state.db.begin().await?;
    for record in &valid {
        sqlx::query(
            r#"
            INSERT INTO historical_projects (company_id, name, job_number, completion_date,
                                             original_bid, final_cost, profit_margin, notes,
                                             imported_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(tenant.company_id)
        .bind(&record.name)
        .bind(&record.job_number)
        .bind(record.completion_date)
        .bind(record.original_bid.and_then(f64_to_decimal))
        .bind(record.final_cost.and_then(f64_to_decimal))
        .bind(record.profit_margin.and_then(f64_to_decimal))
        .bind(&record.notes)
        .bind(tenant.user_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    let result = ImportResult {
        imported: valid.len(),
        skipped: rejected_rows(&errors),
        errors,
    };

    tracing::info!(
        user_id = %tenant.user_id,
        company_id = %tenant.company_id,
        imported = result.imported,
        skipped = result.skipped,
        "Historical projects imported"
    );

    Ok(Json(DataResponse::new(result)))
}

/// GET /imports/projects
pub async fn list_historical_projects(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM historical_projects WHERE company_id = $1")
            .bind(tenant.company_id)
            .fetch_one(&state.db)
            .await?;

    let rows: Vec<HistoricalProjectRow> = sqlx::query_as(
        r#"
        SELECT id, name, job_number, completion_date, original_bid, final_cost, profit_margin,
               import_source, notes, imported_by, created_at
        FROM historical_projects
        WHERE company_id = $1
        ORDER BY completion_date DESC NULLS LAST, created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(tenant.company_id)
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&state.db)
    .await?;

    let data: Vec<HistoricalProjectResponse> = rows.into_iter().map(Into::into).collect();
    Ok(Paginated::new(data, &params, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_rows_counts_each_row_once() {
        let errors = vec![
            RowError::new(2, "name", "Name is required"),
            RowError::new(2, "job_number", "Job number is required"),
            RowError::new(5, "final_cost", "Must be a number"),
        ];
        assert_eq!(rejected_rows(&errors), 2);
        assert_eq!(rejected_rows(&[]), 0);
    }
}
