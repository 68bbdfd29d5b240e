//! Bid schedule versus takeoff discrepancies.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use super::bid_items::load_bid_items;
use super::takeoff::load_takeoffs;
use super::{require_project, trimmed, validated};
use crate::api::{DataResponse, MessageResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireTenant;
use crate::domain::discrepancies::{
    DetectionResult, DiscrepancyQuery, DiscrepancyResponse, DiscrepancyStatus, DiscrepancySummary,
    DiscrepancyType, ResolveDiscrepancyRequest, Severity, SeverityCounts, TypeCounts,
};
use crate::domain::{decimal_to_f64, f64_to_decimal};
use crate::error::ApiError;
use crate::services::discrepancy::{self, BidLine, PlanLine};

#[derive(Debug, sqlx::FromRow)]
struct DiscrepancyRow {
    id: Uuid,
    project_id: Uuid,
    bid_item_id: Option<Uuid>,
    takeoff_item_id: Option<Uuid>,
    discrepancy_type: String,
    severity: String,
    bid_quantity: Option<Decimal>,
    plan_quantity: Option<Decimal>,
    difference_percentage: Option<Decimal>,
    description: String,
    recommendation: Option<String>,
    status: String,
    resolution_notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DiscrepancyRow> for DiscrepancyResponse {
    fn from(row: DiscrepancyRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            bid_item_id: row.bid_item_id,
            takeoff_item_id: row.takeoff_item_id,
            // The table's CHECK constraints keep these in range
            discrepancy_type: DiscrepancyType::parse(&row.discrepancy_type)
                .unwrap_or(DiscrepancyType::QuantityMismatch),
            severity: Severity::parse(&row.severity).unwrap_or(Severity::Medium),
            bid_quantity: row.bid_quantity.map(decimal_to_f64),
            plan_quantity: row.plan_quantity.map(decimal_to_f64),
            difference_percentage: row.difference_percentage.map(decimal_to_f64),
            description: row.description,
            recommendation: row.recommendation,
            status: DiscrepancyStatus::parse(&row.status),
            resolution_notes: row.resolution_notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const DISCREPANCY_COLUMNS: &str = "id, project_id, bid_item_id, takeoff_item_id, discrepancy_type, \
     severity, bid_quantity, plan_quantity, difference_percentage, description, recommendation, \
     status, resolution_notes, created_at, updated_at";

const SEVERITY_RANK: &str = "CASE severity WHEN 'critical' THEN 0 WHEN 'high' THEN 1 \
     WHEN 'medium' THEN 2 ELSE 3 END";

#[derive(Debug, sqlx::FromRow)]
struct SummaryRow {
    open: i64,
    resolved: i64,
    ignored: i64,
    critical: i64,
    high: i64,
    medium: i64,
    low: i64,
    quantity_mismatch: i64,
    missing_item: i64,
    extra_item: i64,
}

impl From<SummaryRow> for DiscrepancySummary {
    fn from(row: SummaryRow) -> Self {
        Self {
            open: row.open,
            resolved: row.resolved,
            ignored: row.ignored,
            by_severity: SeverityCounts {
                critical: row.critical,
                high: row.high,
                medium: row.medium,
                low: row.low,
            },
            by_type: TypeCounts {
                quantity_mismatch: row.quantity_mismatch,
                missing_item: row.missing_item,
                extra_item: row.extra_item,
            },
        }
    }
}

async fn load_summary<'e, E>(executor: E, project_id: Uuid) -> Result<DiscrepancySummary, ApiError>
where
    E: sqlx::PgExecutor<'e>,
{
    let row: SummaryRow = sqlx::query_as(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE status = 'open') AS open,
            COUNT(*) FILTER (WHERE status = 'resolved') AS resolved,
            COUNT(*) FILTER (WHERE status = 'ignored') AS ignored,
            COUNT(*) FILTER (WHERE status = 'open' AND severity = 'critical') AS critical,
            COUNT(*) FILTER (WHERE status = 'open' AND severity = 'high') AS high,
            COUNT(*) FILTER (WHERE status = 'open' AND severity = 'medium') AS medium,
            COUNT(*) FILTER (WHERE status = 'open' AND severity = 'low') AS low,
            COUNT(*) FILTER (WHERE status = 'open' AND discrepancy_type = 'quantity_mismatch') AS quantity_mismatch,
            COUNT(*) FILTER (WHERE status = 'open' AND discrepancy_type = 'missing_item') AS missing_item,
            COUNT(*) FILTER (WHERE status = 'open' AND discrepancy_type = 'extra_item') AS extra_item
        FROM bid_item_discrepancies
        WHERE project_id = $1
        "#,
    )
    .bind(project_id)
    .fetch_one(executor)
    .await?;

    Ok(row.into())
}

/// POST /projects/:project_id/discrepancies/detect
///
/// Replaces every stored discrepancy of the project with a fresh run.
pub async fn detect_discrepancies(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let bid_items = load_bid_items(&state.db, project_id).await?;
    let takeoffs = load_takeoffs(&state.db, project_id).await?;

    let bids: Vec<BidLine<'_>> = bid_items
        .iter()
        .map(|b| BidLine {
            id: b.id,
            description: &b.description,
            quantity: b.quantity.map(decimal_to_f64),
        })
        .collect();
    let plan: Vec<PlanLine<'_>> = takeoffs
        .iter()
        .map(|t| PlanLine {
            id: t.id,
            label: &t.label,
            quantity: decimal_to_f64(t.qty),
        })
        .collect();

    let findings = discrepancy::detect(&bids, &plan);

    let mut tx = state.db.begin().await?;
    sqlx::query("DELETE FROM bid_item_discrepancies WHERE project_id = $1")
        .bind(project_id)
        .execute(&mut *tx)
        .await?;

    let mut stored = Vec::with_capacity(findings.len());
    for finding in &findings {
        let row: DiscrepancyRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO bid_item_discrepancies (project_id, bid_item_id, takeoff_item_id,
                                                discrepancy_type, severity, bid_quantity,
                                                plan_quantity, difference_percentage,
                                                description, recommendation)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            DISCREPANCY_COLUMNS
        ))
        .bind(project_id)
        .bind(finding.bid_item_id)
        .bind(finding.takeoff_item_id)
        .bind(finding.kind.as_str())
        .bind(finding.severity.as_str())
        .bind(finding.bid_quantity.and_then(f64_to_decimal))
        .bind(finding.plan_quantity.and_then(f64_to_decimal))
        .bind(finding.difference_percentage.and_then(f64_to_decimal))
        .bind(&finding.description)
        .bind(finding.recommendation)
        .fetch_one(&mut *tx)
        .await?;
        stored.push(DiscrepancyResponse::from(row));
    }

    let summary = load_summary(&mut *tx, project_id).await?;
    tx.commit().await?;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        bid_items = bid_items.len(),
        takeoff_items = takeoffs.len(),
        discrepancies = stored.len(),
        critical = summary.by_severity.critical,
        "Discrepancy detection finished"
    );

    Ok(Json(DataResponse::new(DetectionResult {
        bid_items_checked: bid_items.len(),
        takeoff_items_checked: takeoffs.len(),
        total_discrepancies: stored.len(),
        discrepancies: stored,
        summary,
    })))
}

/// GET /projects/:project_id/discrepancies
///
/// Most severe first, newest first within a severity.
pub async fn list_discrepancies(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
    Query(params): Query<PaginationParams>,
    Query(query): Query<DiscrepancyQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let filter = r#"
        WHERE project_id = $1
          AND ($2::text IS NULL OR discrepancy_type = $2)
          AND ($3::text IS NULL OR severity = $3)
          AND ($4::text IS NULL OR status = $4)
    "#;
    let kind = query.discrepancy_type.map(|k| k.as_str());
    let severity = query.severity.map(|s| s.as_str());
    let status = query.status.map(|s| s.as_str());

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM bid_item_discrepancies {}",
        filter
    ))
    .bind(project_id)
    .bind(kind)
    .bind(severity)
    .bind(status)
    .fetch_one(&state.db)
    .await?;

    let rows: Vec<DiscrepancyRow> = sqlx::query_as(&format!(
        r#"
        SELECT {} FROM bid_item_discrepancies
        {}
        ORDER BY {}, created_at DESC, id
        LIMIT $5 OFFSET $6
        "#,
        DISCREPANCY_COLUMNS, filter, SEVERITY_RANK
    ))
    .bind(project_id)
    .bind(kind)
    .bind(severity)
    .bind(status)
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&state.db)
    .await?;

    let data: Vec<DiscrepancyResponse> = rows.into_iter().map(Into::into).collect();
    Ok(Paginated::new(data, &params, total))
}

/// GET /projects/:project_id/discrepancies/summary
pub async fn discrepancy_summary(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;
    let summary = load_summary(&state.db, project_id).await?;
    Ok(Json(DataResponse::new(summary)))
}

/// GET /projects/:project_id/discrepancies/:discrepancy_id
pub async fn get_discrepancy(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, discrepancy_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let row: DiscrepancyRow = sqlx::query_as(&format!(
        "SELECT {} FROM bid_item_discrepancies WHERE id = $1 AND project_id = $2",
        DISCREPANCY_COLUMNS
    ))
    .bind(discrepancy_id)
    .bind(project_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Discrepancy not found"))?;

    Ok(Json(DataResponse::new(DiscrepancyResponse::from(row))))
}

/// PATCH /projects/:project_id/discrepancies/:discrepancy_id/status
///
/// Existing resolution notes are kept when none are given.
pub async fn update_discrepancy_status(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, discrepancy_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ResolveDiscrepancyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validated(req.validate())?;
    require_project(&state.db, tenant.company_id, project_id).await?;

    let row: DiscrepancyRow = sqlx::query_as(&format!(
        r#"
        UPDATE bid_item_discrepancies SET
            status = $3,
            resolution_notes = COALESCE($4, resolution_notes),
            updated_at = NOW()
        WHERE id = $1 AND project_id = $2
        RETURNING {}
        "#,
        DISCREPANCY_COLUMNS
    ))
    .bind(discrepancy_id)
    .bind(project_id)
    .bind(req.status.as_str())
    .bind(trimmed(req.resolution_notes))
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Discrepancy not found"))?;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        discrepancy_id = %discrepancy_id,
        status = req.status.as_str(),
        "Discrepancy status updated"
    );

    Ok(Json(DataResponse::new(DiscrepancyResponse::from(row))))
}

/// DELETE /projects/:project_id/discrepancies/:discrepancy_id
pub async fn delete_discrepancy(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, discrepancy_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let result = sqlx::query("DELETE FROM bid_item_discrepancies WHERE id = $1 AND project_id = $2")
        .bind(discrepancy_id)
        .bind(project_id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Discrepancy not found"));
    }

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        discrepancy_id = %discrepancy_id,
        "Discrepancy deleted"
    );

    Ok(Json(MessageResponse::new("Discrepancy deleted")))
}

/// DELETE /projects/:project_id/discrepancies
pub async fn clear_discrepancies(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let result = sqlx::query("DELETE FROM bid_item_discrepancies WHERE project_id = $1")
        .bind(project_id)
        .execute(&state.db)
        .await?;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        deleted = result.rows_affected(),
        "Discrepancies cleared"
    );

    Ok(Json(MessageResponse::new(format!(
        "{} discrepancies deleted",
        result.rows_affected()
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_map_by_name() {
        let summary = DiscrepancySummary::from(SummaryRow {
            open: 4,
            resolved: 2,
            ignored: 1,
            critical: 1,
            high: 2,
            medium: 1,
            low: 0,
            quantity_mismatch: 2,
            missing_item: 1,
            extra_item: 1,
        });
        assert_eq!(summary.open, 4);
        assert_eq!(summary.by_severity.high, 2);
        assert_eq!(summary.by_type.extra_item, 1);
        assert_eq!(
            summary.by_severity.critical + summary.by_severity.high + summary.by_severity.medium,
            summary.open
        );
    }
}
