//! The owner's bid schedule for a project.

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
use crate::domain::discrepancies::{BidItemResponse, CreateBidItemRequest, UpdateBidItemRequest};
use crate::domain::{decimal_to_f64, f64_to_decimal};
use crate::error::ApiError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct BidItemRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub item_number: Option<String>,
    pub description: String,
    pub quantity: Option<Decimal>,
    pub unit: Option<String>,
    pub unit_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<BidItemRow> for BidItemResponse {
    fn from(row: BidItemRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            item_number: row.item_number,
            description: row.description,
            quantity: row.quantity.map(decimal_to_f64),
            unit: row.unit,
            unit_price: row.unit_price.map(decimal_to_f64),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const BID_ITEM_COLUMNS: &str = "id, project_id, item_number, description, quantity, unit, \
     unit_price, created_at, updated_at";

/// Bid schedule in entry order
pub(crate) async fn load_bid_items(
    db: &sqlx::PgPool,
    project_id: Uuid,
) -> Result<Vec<BidItemRow>, ApiError> {
    let rows = sqlx::query_as(&format!(
        "SELECT {} FROM project_bid_items WHERE project_id = $1 ORDER BY created_at, id",
        BID_ITEM_COLUMNS
    ))
    .bind(project_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

fn optional_amount(value: Option<f64>, field: &str) -> Result<Option<Decimal>, ApiError> {
    value
        .map(|v| {
            f64_to_decimal(v)
                .ok_or_else(|| ApiError::bad_request(format!("{} is not a valid number", field)))
        })
        .transpose()
}

/// GET /projects/:project_id/bid-items
pub async fn list_bid_items(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;
    let rows = load_bid_items(&state.db, project_id).await?;
    let data: Vec<BidItemResponse> = rows.into_iter().map(Into::into).collect();
    Ok(Json(DataResponse::new(data)))
}

/// POST /projects/:project_id/bid-items
pub async fn create_bid_item(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
    Json(req): Json<CreateBidItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validated(req.validate())?;
    require_project(&state.db, tenant.company_id, project_id).await?;

    let row: BidItemRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO project_bid_items (project_id, item_number, description, quantity, unit, unit_price)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {}
        "#,
        BID_ITEM_COLUMNS
    ))
    .bind(project_id)
    .bind(trimmed(req.item_number))
    .bind(req.description.trim())
    .bind(optional_amount(req.quantity, "quantity")?)
    .bind(trimmed(req.unit).map(|u| u.to_uppercase()))
    .bind(optional_amount(req.unit_price, "unit_price")?)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        bid_item_id = %row.id,
        "Bid item added"
    );

    Ok(Created(BidItemResponse::from(row)))
}

/// PUT /projects/:project_id/bid-items/:bid_item_id
pub async fn update_bid_item(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, bid_item_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateBidItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validated(req.validate())?;
    require_project(&state.db, tenant.company_id, project_id).await?;

    let row: BidItemRow = sqlx::query_as(&format!(
        r#"
        UPDATE project_bid_items SET
            item_number = COALESCE($3, item_number),
            description = COALESCE($4, description),
            quantity = COALESCE($5, quantity),
            unit = COALESCE($6, unit),
            unit_price = COALESCE($7, unit_price),
            updated_at = NOW()
        WHERE id = $1 AND project_id = $2
        RETURNING {}
        "#,
        BID_ITEM_COLUMNS
    ))
    .bind(bid_item_id)
    .bind(project_id)
    .bind(trimmed(req.item_number))
    .bind(trimmed(req.description))
    .bind(optional_amount(req.quantity, "quantity")?)
    .bind(trimmed(req.unit).map(|u| u.to_uppercase()))
    .bind(optional_amount(req.unit_price, "unit_price")?)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Bid item not found"))?;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        bid_item_id = %bid_item_id,
        "Bid item updated"
    );

    Ok(Json(DataResponse::new(BidItemResponse::from(row))))
}

/// DELETE /projects/:project_id/bid-items/:bid_item_id
///
/// Discrepancies raised against the line go with it.
pub async fn delete_bid_item(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, bid_item_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let result = sqlx::query("DELETE FROM project_bid_items WHERE id = $1 AND project_id = $2")
        .bind(bid_item_id)
        .bind(project_id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Bid item not found"));
    }

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        bid_item_id = %bid_item_id,
        "Bid item deleted"
    );

    Ok(Json(MessageResponse::new("Bid item deleted")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_amounts_reject_non_numbers() {
        assert_eq!(optional_amount(None, "quantity").unwrap(), None);
        assert_eq!(
            optional_amount(Some(12.5), "quantity").unwrap(),
            Some(Decimal::new(125, 1))
        );
        assert!(matches!(
            optional_amount(Some(f64::INFINITY), "unit_price"),
            Err(ApiError::BadRequest(msg)) if msg == "unit_price is not a valid number"
        ));
    }
}
