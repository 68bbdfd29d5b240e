//! Project estimates: price the takeoff, roll up costs, keep a snapshot.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json as SqlJson;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::companies::{fetch_company, load_company_rates};
use super::matching::{load_matcher, match_takeoff};
use super::pdf_export::company_block;
use super::require_project;
use super::takeoff::{load_takeoffs, TakeoffRow};
use crate::api::{Created, DataResponse, FileDownload, MessageResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireTenant;
use crate::domain::estimates::{
    estimate_warnings, CreateEstimateRequest, CreateEstimateResponse, EstimateBreakdown,
    EstimateLineItem, EstimateResponse, EstimateSummary,
};
use crate::domain::{decimal_to_f64, f64_to_decimal};
use crate::error::ApiError;
use crate::services::estimator::{price_line, roll_up, CostBasis, RateCard, TakeoffLine};
use crate::services::matcher::select_best;
use crate::services::quote_pdf::{self, EstimateDocument};

#[derive(Debug, sqlx::FromRow)]
struct EstimateRow {
    id: Uuid,
    project_id: Uuid,
    created_by: Option<Uuid>,
    materials_cost: Decimal,
    labor_cost: Decimal,
    equipment_cost: Decimal,
    subcontractor_cost: Decimal,
    direct_cost: Decimal,
    overhead_percentage: Decimal,
    overhead: Decimal,
    profit_percentage: Decimal,
    profit: Decimal,
    total_cost: Decimal,
    tax_percentage: Decimal,
    tax_amount: Decimal,
    grand_total: Decimal,
    confidence_score: Decimal,
    line_items: SqlJson<Vec<EstimateLineItem>>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<EstimateRow> for EstimateResponse {
    fn from(row: EstimateRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            created_by: row.created_by,
            breakdown: EstimateBreakdown::from_columns([
                row.materials_cost,
                row.labor_cost,
                row.equipment_cost,
                row.subcontractor_cost,
                row.direct_cost,
                row.overhead_percentage,
                row.overhead,
                row.profit_percentage,
                row.profit,
                row.total_cost,
                row.tax_percentage,
                row.tax_amount,
                row.grand_total,
            ]),
            confidence_score: decimal_to_f64(row.confidence_score),
            line_items: row.line_items.0,
            notes: row.notes,
            created_at: row.created_at,
        }
    }
}

const ESTIMATE_COLUMNS: &str = "id, project_id, created_by, materials_cost, labor_cost, \
     equipment_cost, subcontractor_cost, direct_cost, overhead_percentage, overhead, \
     profit_percentage, profit, total_cost, tax_percentage, tax_amount, grand_total, \
     confidence_score, line_items, notes, created_at";

#[derive(Debug, sqlx::FromRow)]
struct AcceptedQuote {
    id: Uuid,
    takeoff_item_id: Uuid,
    vendor_name: String,
    total_price: Decimal,
}

#[derive(Debug, sqlx::FromRow)]
struct MatchedMaterial {
    id: Uuid,
    description: String,
    category: String,
    unit_price: Decimal,
}

async fn find_estimate(
    state: &AppState,
    project_id: Uuid,
    estimate_id: Uuid,
) -> Result<EstimateRow, ApiError> {
    sqlx::query_as(&format!(
        "SELECT {} FROM estimates WHERE id = $1 AND project_id = $2",
        ESTIMATE_COLUMNS
    ))
    .bind(estimate_id)
    .bind(project_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Estimate not found"))
}

/// Material cost source for one takeoff row: accepted quote, stored match, fresh match.
fn cost_basis(
    row: &TakeoffRow,
    quotes: &HashMap<Uuid, AcceptedQuote>,
    materials: &HashMap<Uuid, MatchedMaterial>,
    fresh: impl FnOnce() -> CostBasis,
) -> CostBasis {
    if let Some(quote) = quotes.get(&row.id) {
        return CostBasis::AcceptedQuote {
            quote_id: quote.id,
            vendor_name: quote.vendor_name.clone(),
            total_price: quote.total_price,
        };
    }

    if let Some(material) = row.matched_material_id.and_then(|id| materials.get(&id)) {
        return CostBasis::Catalog {
            material_id: material.id,
            description: material.description.clone(),
            category: material.category.clone(),
            unit_price: row.unit_price.unwrap_or(material.unit_price),
            confidence: row.match_confidence.map(decimal_to_f64).unwrap_or(1.0),
            auto_matched: false,
        };
    }

    fresh()
}

/// POST /projects/:project_id/estimates
pub async fn create_estimate(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
    Json(req): Json<CreateEstimateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate().map_err(ApiError::bad_request)?;
    require_project(&state.db, tenant.company_id, project_id).await?;

    let takeoffs = load_takeoffs(&state.db, project_id).await?;
    if takeoffs.is_empty() {
        return Err(ApiError::bad_request(
            "Project has no takeoff items to estimate",
        ));
    }

    let quotes: HashMap<Uuid, AcceptedQuote> = sqlx::query_as::<_, AcceptedQuote>(
        r#"
        SELECT DISTINCT ON (takeoff_item_id) id, takeoff_item_id, vendor_name, total_price
        FROM quotes
        WHERE project_id = $1 AND status = 'accepted' AND takeoff_item_id IS NOT NULL
        ORDER BY takeoff_item_id, updated_at DESC
        "#,
    )
    .bind(project_id)
    .fetch_all(&state.db)
    .await?
    .into_iter()
    .map(|q| (q.takeoff_item_id, q))
    .collect();

    let matched_ids: Vec<Uuid> = takeoffs.iter().filter_map(|t| t.matched_material_id).collect();
    let materials: HashMap<Uuid, MatchedMaterial> = sqlx::query_as::<_, MatchedMaterial>(
        "SELECT id, description, category, unit_price FROM materials WHERE company_id = $1 AND id = ANY($2)",
    )
    .bind(tenant.company_id)
    .bind(&matched_ids)
    .fetch_all(&state.db)
    .await?
    .into_iter()
    .map(|m| (m.id, m))
    .collect();

    let company_rates = load_company_rates(&state.db, tenant.company_id).await?;
    let options = req.options();
    let rates = RateCard::resolve(company_rates.as_ref(), &options);
    let matcher = load_matcher(&state.db, tenant.company_id).await?;

    let lines = takeoffs
        .iter()
        .map(|row| {
            let basis = cost_basis(row, &quotes, &materials, || {
                let matches = match_takeoff(&matcher, row, req.match_threshold);
                match select_best(&matches, req.auto_accept_high_confidence) {
                    Some(best) => CostBasis::Catalog {
                        material_id: best.material.id,
                        description: best.material.description.clone(),
                        category: best.material.category.clone(),
                        unit_price: best.material.unit_price,
                        confidence: best.confidence,
                        auto_matched: true,
                    },
                    None => CostBasis::Unpriced,
                }
            });
            let line = TakeoffLine {
                id: row.id,
                label: row.label.clone(),
                qty: row.qty,
                unit: row.unit.clone(),
                category: row.category.clone(),
            };
            price_line(&line, basis, &rates, &options)
        })
        .collect();

    let breakdown = roll_up(lines, &rates, &options);
    let line_items: Vec<EstimateLineItem> = breakdown.lines.iter().map(EstimateLineItem::from).collect();
    let notes = req
        .notes
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| breakdown.summary_note());
    let confidence = f64_to_decimal(breakdown.confidence_score)
        .unwrap_or_default()
        .round_dp(4);

    let row: EstimateRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO estimates (project_id, created_by, materials_cost, labor_cost, equipment_cost,
                               subcontractor_cost, direct_cost, overhead_percentage, overhead,
                               profit_percentage, profit, total_cost, tax_percentage, tax_amount,
                               grand_total, confidence_score, line_items, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        RETURNING {}
        "#,
        ESTIMATE_COLUMNS
    ))
    .bind(project_id)
    .bind(tenant.user_id)
    .bind(breakdown.materials_cost)
    .bind(breakdown.labor_cost)
    .bind(breakdown.equipment_cost)
    .bind(breakdown.subcontractor_cost)
    .bind(breakdown.direct_cost)
    .bind(breakdown.overhead_percentage)
    .bind(breakdown.overhead)
    .bind(breakdown.profit_percentage)
    .bind(breakdown.profit)
    .bind(breakdown.total_cost)
    .bind(breakdown.tax_percentage)
    .bind(breakdown.tax_amount)
    .bind(breakdown.grand_total)
    .bind(confidence)
    .bind(SqlJson(&line_items))
    .bind(&notes)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        estimate_id = %row.id,
        grand_total = %breakdown.grand_total,
        priced = breakdown.priced_items,
        total = breakdown.total_items,
        "Estimate created"
    );

    Ok(Created(CreateEstimateResponse {
        summary: EstimateSummary::from(&breakdown),
        warnings: estimate_warnings(&breakdown),
        estimate: EstimateResponse::from(row),
    }))
}

/// GET /projects/:project_id/estimates
pub async fn list_estimates(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM estimates WHERE project_id = $1")
        .bind(project_id)
        .fetch_one(&state.db)
        .await?;

    let rows: Vec<EstimateRow> = sqlx::query_as(&format!(
        r#"
        SELECT {} FROM estimates
        WHERE project_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
        ESTIMATE_COLUMNS
    ))
    .bind(project_id)
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&state.db)
    .await?;

    let data: Vec<EstimateResponse> = rows.into_iter().map(Into::into).collect();
    Ok(Paginated::new(data, &params, total))
}

/// GET /projects/:project_id/estimates/:estimate_id
pub async fn get_estimate(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, estimate_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;
    let row = find_estimate(&state, project_id, estimate_id).await?;
    Ok(Json(DataResponse::new(EstimateResponse::from(row))))
}

/// DELETE /projects/:project_id/estimates/:estimate_id
pub async fn delete_estimate(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, estimate_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let result = sqlx::query("DELETE FROM estimates WHERE id = $1 AND project_id = $2")
        .bind(estimate_id)
        .bind(project_id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Estimate not found"));
    }

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        estimate_id = %estimate_id,
        "Estimate deleted"
    );

    Ok(Json(MessageResponse::new("Estimate deleted")))
}

/// GET /projects/:project_id/estimates/:estimate_id/pdf
pub async fn estimate_pdf(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, estimate_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let project = require_project(&state.db, tenant.company_id, project_id).await?;
    let estimate = EstimateResponse::from(find_estimate(&state, project_id, estimate_id).await?);
    let company = fetch_company(&state.db, tenant.company_id).await?;

    let document = EstimateDocument {
        company: company_block(&company),
        project_name: project.name,
        job_number: Some(project.job_number.clone()),
        estimate_id: estimate.id,
        created_at: estimate.created_at,
        breakdown: estimate.breakdown,
        confidence_score: estimate.confidence_score,
        line_items: estimate.line_items,
        notes: estimate.notes,
    };

    let filename = quote_pdf::quote_filename("estimate", Some(&project.job_number));
    let bytes = tokio::task::spawn_blocking(move || quote_pdf::render_estimate(&document))
        .await
        .map_err(|e| ApiError::internal(format!("PDF task failed: {}", e)))??;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        estimate_id = %estimate_id,
        bytes = bytes.len(),
        "Estimate PDF rendered"
    );

    Ok(FileDownload::pdf(bytes, filename))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn takeoff(matched: Option<Uuid>, unit_price: Option<&str>) -> TakeoffRow {
        TakeoffRow {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            document_id: None,
            label: "2x4x8 stud".to_string(),
            qty: Decimal::from(100),
            unit: "EA".to_string(),
            category: None,
            source_page: None,
            notes: None,
            matched_material_id: matched,
            match_confidence: None,
            unit_price: unit_price.map(|p| Decimal::from_str(p).unwrap()),
            total_price: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn material(id: Uuid) -> MatchedMaterial {
        MatchedMaterial {
            id,
            description: "STUD 2X4 8FT".to_string(),
            category: "Walls".to_string(),
            unit_price: Decimal::from_str("4.25").unwrap(),
        }
    }

    #[test]
    fn accepted_quote_wins_over_stored_match() {
        let material_id = Uuid::new_v4();
        let row = takeoff(Some(material_id), None);
        let quotes = HashMap::from([(
            row.id,
            AcceptedQuote {
                id: Uuid::new_v4(),
                takeoff_item_id: row.id,
                vendor_name: "Valley Lumber".to_string(),
                total_price: Decimal::from(390),
            },
        )]);
        let materials = HashMap::from([(material_id, material(material_id))]);

        let basis = cost_basis(&row, &quotes, &materials, || CostBasis::Unpriced);
        assert!(matches!(basis, CostBasis::AcceptedQuote { total_price, .. } if total_price == Decimal::from(390)));
    }

    #[test]
    fn stored_match_uses_the_takeoff_price() {
        let material_id = Uuid::new_v4();
        let row = takeoff(Some(material_id), Some("3.99"));
        let materials = HashMap::from([(material_id, material(material_id))]);

        let basis = cost_basis(&row, &HashMap::new(), &materials, || CostBasis::Unpriced);
        match basis {
            CostBasis::Catalog {
                unit_price,
                auto_matched,
                confidence,
                ..
            } => {
                assert_eq!(unit_price, Decimal::from_str("3.99").unwrap());
                assert!(!auto_matched);
                assert_eq!(confidence, 1.0);
            }
            other => panic!("unexpected basis {:?}", other),
        }
    }

    #[test]
    fn falls_back_to_fresh_match() {
        let row = takeoff(None, None);
        let basis = cost_basis(&row, &HashMap::new(), &HashMap::new(), || CostBasis::Unpriced);
        assert!(matches!(basis, CostBasis::Unpriced));
    }
}
