//! Takeoff items: quantities taken off the plans for one project.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use super::{require_project, trimmed, validated};
use crate::api::{Created, DataResponse, MessageResponse};
use crate::app::AppState;
use crate::auth::RequireTenant;
use crate::domain::takeoff::{
    normalize_unit, CreateTakeoffRequest, SetMatchRequest, TakeoffItemResponse, UpdateTakeoffRequest,
};
use crate::domain::{decimal_to_f64, f64_to_decimal};
use crate::error::ApiError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct TakeoffRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub document_id: Option<Uuid>,
    pub label: String,
    pub qty: Decimal,
    pub unit: String,
    pub category: Option<String>,
    pub source_page: Option<i32>,
    pub notes: Option<String>,
    pub matched_material_id: Option<Uuid>,
    pub match_confidence: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub total_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TakeoffRow> for TakeoffItemResponse {
    fn from(row: TakeoffRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            document_id: row.document_id,
            label: row.label,
            qty: decimal_to_f64(row.qty),
            unit: row.unit,
            category: row.category,
            source_page: row.source_page,
            notes: row.notes,
            matched_material_id: row.matched_material_id,
            match_confidence: row.match_confidence.map(decimal_to_f64),
            unit_price: row.unit_price.map(decimal_to_f64),
            total_price: row.total_price.map(decimal_to_f64),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub(crate) const TAKEOFF_COLUMNS: &str = "id, project_id, document_id, label, qty, unit, category, \
     source_page, notes, matched_material_id, match_confidence, unit_price, total_price, \
     created_at, updated_at";

/// All takeoff items of a project in entry order
pub(crate) async fn load_takeoffs(
    db: &sqlx::PgPool,
    project_id: Uuid,
) -> Result<Vec<TakeoffRow>, ApiError> {
    let rows = sqlx::query_as(&format!(
        "SELECT {} FROM takeoff_items WHERE project_id = $1 ORDER BY created_at, id",
        TAKEOFF_COLUMNS
    ))
    .bind(project_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// A catalog material pinned onto a takeoff item
#[derive(Debug, Clone)]
pub(crate) struct AppliedMatch {
    pub material_id: Uuid,
    pub unit_price: Decimal,
    pub category: Option<String>,
    pub confidence: Decimal,
}

/// Store a match; the line total is recomputed from the row's quantity.
pub(crate) async fn store_match<'e, E>(
    executor: E,
    takeoff_id: Uuid,
    applied: &AppliedMatch,
) -> Result<Option<TakeoffRow>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as(&format!(
        r#"
        UPDATE takeoff_items SET
            matched_material_id = $2,
            unit_price = $3,
            total_price = ROUND(qty * $3, 2),
            category = COALESCE($4, category),
            match_confidence = $5,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        TAKEOFF_COLUMNS
    ))
    .bind(takeoff_id)
    .bind(applied.material_id)
    .bind(applied.unit_price)
    .bind(&applied.category)
    .bind(applied.confidence)
    .fetch_optional(executor)
    .await
}

fn qty_decimal(qty: f64) -> Result<Decimal, ApiError> {
    f64_to_decimal(qty).ok_or_else(|| ApiError::bad_request("Quantity must be a number"))
}

/// GET /projects/:project_id/takeoffs
pub async fn list_takeoffs(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let rows = load_takeoffs(&state.db, project_id).await?;
    let data: Vec<TakeoffItemResponse> = rows.into_iter().map(Into::into).collect();
    Ok(Json(DataResponse::new(data)))
}

/// POST /projects/:project_id/takeoffs
pub async fn create_takeoff(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
    Json(req): Json<CreateTakeoffRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validated(req.validate())?;
    require_project(&state.db, tenant.company_id, project_id).await?;

    if let Some(document_id) = req.document_id {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM project_documents WHERE id = $1 AND project_id = $2)",
        )
        .bind(document_id)
        .bind(project_id)
        .fetch_one(&state.db)
        .await?;
        if !exists {
            return Err(ApiError::not_found("Document not found"));
        }
    }

    let row: TakeoffRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO takeoff_items (project_id, document_id, label, qty, unit, category,
                                   source_page, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {}
        "#,
        TAKEOFF_COLUMNS
    ))
    .bind(project_id)
    .bind(req.document_id)
    .bind(req.label.trim())
    .bind(qty_decimal(req.qty)?)
    .bind(normalize_unit(req.unit.as_deref()))
    .bind(trimmed(req.category))
    .bind(req.source_page)
    .bind(trimmed(req.notes))
    .fetch_one(&state.db)
    .await?;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        takeoff_id = %row.id,
        "Takeoff item created"
    );

    Ok(Created(TakeoffItemResponse::from(row)))
}

/// PATCH /projects/:project_id/takeoffs/:takeoff_id
pub async fn update_takeoff(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, takeoff_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateTakeoffRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validated(req.validate())?;
    require_project(&state.db, tenant.company_id, project_id).await?;

    let qty = req.qty.map(qty_decimal).transpose()?;
    let unit = req.unit.as_deref().map(|u| normalize_unit(Some(u)));

    // A priced line keeps its total in step with the quantity
    let row: TakeoffRow = sqlx::query_as(&format!(
        r#"
        UPDATE takeoff_items SET
            label = COALESCE($3, label),
            qty = COALESCE($4, qty),
            unit = COALESCE($5, unit),
            category = COALESCE($6, category),
            source_page = COALESCE($7, source_page),
            notes = COALESCE($8, notes),
            total_price = CASE
                WHEN unit_price IS NULL THEN total_price
                ELSE ROUND(COALESCE($4, qty) * unit_price, 2)
            END,
            updated_at = NOW()
        WHERE id = $1 AND project_id = $2
        RETURNING {}
        "#,
        TAKEOFF_COLUMNS
    ))
    .bind(takeoff_id)
    .bind(project_id)
    .bind(trimmed(req.label))
    .bind(qty)
    .bind(unit)
    .bind(trimmed(req.category))
    .bind(req.source_page)
    .bind(trimmed(req.notes))
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Takeoff item not found"))?;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        takeoff_id = %takeoff_id,
        "Takeoff item updated"
    );

    Ok(Json(DataResponse::new(TakeoffItemResponse::from(row))))
}

/// DELETE /projects/:project_id/takeoffs/:takeoff_id
pub async fn delete_takeoff(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, takeoff_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let result = sqlx::query("DELETE FROM takeoff_items WHERE id = $1 AND project_id = $2")
        .bind(takeoff_id)
        .bind(project_id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Takeoff item not found"));
    }

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        takeoff_id = %takeoff_id,
        "Takeoff item deleted"
    );

    Ok(Json(MessageResponse::new("Takeoff item deleted")))
}

/// DELETE /projects/:project_id/takeoffs
pub async fn delete_all_takeoffs(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let result = sqlx::query("DELETE FROM takeoff_items WHERE project_id = $1")
        .bind(project_id)
        .execute(&state.db)
        .await?;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        deleted = result.rows_affected(),
        "Takeoff items cleared"
    );

    Ok(Json(MessageResponse::new(format!(
        "{} takeoff items deleted",
        result.rows_affected()
    ))))
}

#[derive(Debug, sqlx::FromRow)]
struct MaterialPrice {
    unit_price: Decimal,
    category: String,
}

/// PUT /projects/:project_id/takeoffs/:takeoff_id/match
///
/// A `null` material clears the match and the pricing that came with it.
pub async fn set_takeoff_match(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, takeoff_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<SetMatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let row: Option<TakeoffRow> = match req.material_id {
        Some(material_id) => {
            let material: MaterialPrice = sqlx::query_as(
                "SELECT unit_price, category FROM materials WHERE id = $1 AND company_id = $2",
            )
            .bind(material_id)
            .bind(tenant.company_id)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| ApiError::not_found("Material not found"))?;

            let belongs: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM takeoff_items WHERE id = $1 AND project_id = $2)",
            )
            .bind(takeoff_id)
            .bind(project_id)
            .fetch_one(&state.db)
            .await?;
            if !belongs {
                return Err(ApiError::not_found("Takeoff item not found"));
            }

            let applied = AppliedMatch {
                material_id,
                unit_price: material.unit_price,
                category: Some(material.category),
                confidence: Decimal::ONE,
            };
            store_match(&state.db, takeoff_id, &applied).await?
        }
        None => {
            sqlx::query_as(&format!(
                r#"
                UPDATE takeoff_items SET
                    matched_material_id = NULL,
                    match_confidence = NULL,
                    unit_price = NULL,
                    total_price = NULL,
                    updated_at = NOW()
                WHERE id = $1 AND project_id = $2
                RETURNING {}
                "#,
                TAKEOFF_COLUMNS
            ))
            .bind(takeoff_id)
            .bind(project_id)
            .fetch_optional(&state.db)
            .await?
        }
    };

    let row = row.ok_or_else(|| ApiError::not_found("Takeoff item not found"))?;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        takeoff_id = %takeoff_id,
        material_id = ?req.material_id,
        "Takeoff match set"
    );

    Ok(Json(DataResponse::new(TakeoffItemResponse::from(row))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn non_finite_quantity_is_rejected() {
        assert!(qty_decimal(f64::NAN).is_err());
        assert_eq!(qty_decimal(2.5).unwrap(), Decimal::from_str("2.5").unwrap());
    }
}
